//! Single-peer connection slot.
//!
//! Owns the worker-facing TCP listener and at most one accepted peer,
//! modeled as an explicit state machine so the "reject a second peer" rule
//! is one transition instead of a scattered guard:
//!
//! ```text
//! Idle -> Listening -> Connected -> Disconnected -> Listening -> ...
//! ```
//!
//! The read and write halves sit behind separate locks: the forwarding loop
//! is the only reader and may hold the read lock across a poll, while
//! `send` stays available to callers throughout.

use std::net::SocketAddr;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ProtocolConfig;
use crate::error::{BrokerError, Result};
use crate::protocol::{Frame, FrameDecoder};

/// Lifecycle state of the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Listening,
    Connected,
    Disconnected,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Idle => "idle",
            SlotState::Listening => "listening",
            SlotState::Connected => "connected",
            SlotState::Disconnected => "disconnected",
        }
    }
}

struct PeerReader {
    half: OwnedReadHalf,
    decoder: FrameDecoder,
}

/// The listening endpoint plus at most one accepted peer.
pub struct ConnectionSlot {
    state: StdMutex<SlotState>,
    listener: Mutex<Option<TcpListener>>,
    reader: Mutex<Option<PeerReader>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    local_addr: StdMutex<Option<SocketAddr>>,
}

impl Default for ConnectionSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionSlot {
    pub fn new() -> Self {
        Self {
            state: StdMutex::new(SlotState::Idle),
            listener: Mutex::new(None),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            local_addr: StdMutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SlotState {
        *self.state.lock().expect("slot state lock poisoned")
    }

    fn set_state(&self, next: SlotState) {
        *self.state.lock().expect("slot state lock poisoned") = next;
    }

    /// Address the listener is bound to, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("slot addr lock poisoned")
    }

    /// Bind and begin listening.
    ///
    /// Idempotent: an existing listener is closed and rebound. An attached
    /// peer, if any, is not disturbed.
    pub async fn listen(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let bind_addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| BrokerError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| BrokerError::Bind {
            addr: bind_addr,
            source,
        })?;

        // Replacing the old listener drops (closes) it.
        *self.listener.lock().await = Some(listener);
        *self.local_addr.lock().expect("slot addr lock poisoned") = Some(addr);
        if self.state() != SlotState::Connected {
            self.set_state(SlotState::Listening);
        }

        info!("Listening for worker connection on {}", addr);
        Ok(addr)
    }

    /// Poll for a pending connection for up to `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived within the bound (callers
    /// loop and re-check their shutdown signal between polls). If a peer is
    /// already connected the new transport is closed immediately and
    /// `PeerRejected` is reported; the existing peer is unaffected.
    pub async fn accept(&self, timeout: Duration) -> Result<Option<SocketAddr>> {
        let listener_guard = self.listener.lock().await;
        let listener = listener_guard.as_ref().ok_or(BrokerError::NotListening)?;

        if self.state() == SlotState::Disconnected {
            self.set_state(SlotState::Listening);
        }

        let accepted = match tokio::time::timeout(timeout, listener.accept()).await {
            Err(_elapsed) => return Ok(None),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(accepted)) => accepted,
        };
        let (stream, peer_addr) = accepted;

        if self.state() == SlotState::Connected {
            warn!("Rejecting peer {}: slot already occupied", peer_addr);
            drop(stream);
            return Err(BrokerError::PeerRejected { addr: peer_addr });
        }

        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(PeerReader {
            half: read_half,
            decoder: FrameDecoder::new(),
        });
        *self.writer.lock().await = Some(write_half);
        self.set_state(SlotState::Connected);

        info!("Worker attached from {}", peer_addr);
        Ok(Some(peer_addr))
    }

    /// Write one framed message to the attached peer.
    ///
    /// A frame over the payload cap fails with `FrameTooLarge` before any
    /// bytes are written; the peer stays attached. A write failure detaches
    /// the peer and reports `ConnectionLost`.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode()?;
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(BrokerError::ConnectionLost)?;

        let written = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            debug!("Write to peer failed: {}", e);
            // Drop the write half; the reader observes the teardown on its
            // next poll via the state flag.
            *writer_guard = None;
            self.set_state(SlotState::Disconnected);
            return Err(BrokerError::ConnectionLost);
        }
        Ok(())
    }

    /// Wait up to `timeout` for readable data and reassemble frames.
    ///
    /// An empty vec means "no complete frame yet, poll again". EOF detaches
    /// the peer and reports `PeerClosed`; a framing violation detaches the
    /// peer and propagates the codec error.
    pub async fn receive(&self, timeout: Duration) -> Result<Vec<Frame>> {
        let mut reader_guard = self.reader.lock().await;

        // A failed send may have detached the peer already.
        if self.state() != SlotState::Connected {
            if reader_guard.take().is_some() {
                self.clear_writer().await;
            }
            return Err(BrokerError::PeerClosed);
        }
        let reader = reader_guard.as_mut().ok_or(BrokerError::PeerClosed)?;

        let mut chunk = [0u8; ProtocolConfig::READ_CHUNK_SIZE];
        let read = match tokio::time::timeout(timeout, reader.half.read(&mut chunk)).await {
            Err(_elapsed) => return Ok(Vec::new()),
            Ok(read) => read,
        };

        match read {
            Ok(0) => {
                debug!("Peer closed the connection (EOF)");
                *reader_guard = None;
                self.clear_writer().await;
                self.set_state(SlotState::Disconnected);
                Err(BrokerError::PeerClosed)
            }
            Ok(n) => match reader.decoder.feed(&chunk[..n]) {
                Ok(frames) => Ok(frames),
                Err(e) => {
                    warn!("Dropping peer after protocol violation: {}", e);
                    *reader_guard = None;
                    self.clear_writer().await;
                    self.set_state(SlotState::Disconnected);
                    Err(e)
                }
            },
            Err(e) => {
                debug!("Read from peer failed: {}", e);
                *reader_guard = None;
                self.clear_writer().await;
                self.set_state(SlotState::Disconnected);
                Err(BrokerError::ConnectionLost)
            }
        }
    }

    async fn clear_writer(&self) {
        *self.writer.lock().await = None;
    }

    /// Close the listening and peer transports if open.
    ///
    /// Always safe to call; a second call is a no-op.
    pub async fn disconnect(&self) {
        let had_listener = self.listener.lock().await.take().is_some();
        let had_reader = self.reader.lock().await.take().is_some();
        let had_writer = self.writer.lock().await.take().is_some();
        *self.local_addr.lock().expect("slot addr lock poisoned") = None;
        self.set_state(SlotState::Idle);

        if had_listener || had_reader || had_writer {
            info!("Connection slot closed");
        }
    }
}
