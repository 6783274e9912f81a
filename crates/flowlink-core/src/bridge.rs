//! Reconnection supervisor and forwarding loop.
//!
//! The [`Broker`] keeps the connection slot occupied: it acquires the
//! single-permit reconnection token, listens, polls `accept` until a worker
//! attaches, then drains the slot through the forwarding loop until the
//! worker is lost and starts over. Frames the router does not consume are
//! republished toward the UI channel; the UI also gets a status event on
//! every attach and loss.
//!
//! After a lost peer the supervisor always resumes accepting on the
//! already-bound listener; the lazy flag only defers the initial listen
//! until [`Broker::activate`] fires.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use crate::cancel::ShutdownToken;
use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::protocol::MessageKind;
use crate::router::{MethodDispatch, Router};
use crate::slot::ConnectionSlot;

/// Push sink representing the browser-side live connection.
///
/// Supplied by the embedding application; the broker only needs to publish
/// named events with JSON payloads.
#[async_trait]
pub trait UiSink: Send + Sync + 'static {
    async fn publish(&self, event: &str, payload: Value);
}

/// The broker: connection supervisor plus request/response bridge.
pub struct Broker {
    config: BrokerConfig,
    slot: Arc<ConnectionSlot>,
    router: Arc<Router>,
    sink: Arc<dyn UiSink>,
    shutdown: ShutdownToken,
    /// Single-permit reconnection token: at most one accept attempt runs.
    attach_gate: Arc<Semaphore>,
    /// Lazy-mode trigger; a permit is stored if it fires before `run`.
    activate: Notify,
}

impl Broker {
    pub fn new(
        config: BrokerConfig,
        slot: Arc<ConnectionSlot>,
        dispatch: Arc<dyn MethodDispatch>,
        sink: Arc<dyn UiSink>,
        shutdown: ShutdownToken,
    ) -> Self {
        let router = Arc::new(Router::new(slot.clone(), dispatch, shutdown.clone()));
        Self {
            config,
            slot,
            router,
            sink,
            shutdown,
            attach_gate: Arc::new(Semaphore::new(1)),
            activate: Notify::new(),
        }
    }

    /// Bind the listener eagerly and report the bound address.
    ///
    /// Optional: `run` listens on its own when the slot is not bound yet.
    pub async fn bind(&self) -> Result<SocketAddr> {
        self.slot.listen(&self.config.host, self.config.port).await
    }

    /// Fire the lazy-mode trigger. A no-op in eager mode or once running.
    pub fn activate(&self) {
        self.activate.notify_one();
    }

    /// Request broker shutdown: pending callers and poll loops unblock
    /// within one poll interval.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    pub fn slot(&self) -> Arc<ConnectionSlot> {
        self.slot.clone()
    }

    /// Call a method on the attached worker and await the correlated
    /// response.
    pub async fn call(&self, kind: MessageKind, method: &str, params: Value) -> Result<Value> {
        self.router.call(kind, method, params).await
    }

    /// Send a fire-and-forget notification to the attached worker.
    pub async fn notify(&self, kind: MessageKind, method: &str, params: Value) -> Result<()> {
        self.router.notify(kind, method, params).await
    }

    /// True while an accept attempt holds the reconnection token.
    pub fn attach_in_progress(&self) -> bool {
        self.attach_gate.available_permits() == 0
    }

    /// Drive the supervisor until shutdown.
    ///
    /// Returns early only on a fatal bind failure; every other transport
    /// event is absorbed and the loop resumes awaiting a peer.
    pub async fn run(&self) -> Result<()> {
        if self.config.lazy {
            tokio::select! {
                _ = self.activate.notified() => {}
                _ = self.shutdown.cancelled() => return Ok(()),
            }
        }

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            // The token serializes accept attempts: a concurrent attach
            // request blocks here instead of starting a second listener.
            let permit = tokio::select! {
                acquired = self.attach_gate.clone().acquire_owned() => {
                    match acquired {
                        Ok(permit) => permit,
                        Err(_closed) => break,
                    }
                }
                _ = self.shutdown.cancelled() => break,
            };

            if self.slot.local_addr().is_none() {
                self.bind().await?;
            }

            let Some(peer) = self.await_peer().await? else {
                // Shutdown observed while awaiting a peer.
                drop(permit);
                break;
            };
            drop(permit);

            self.publish_status(true, Some(peer)).await;
            self.forward_loop().await;
            self.router.fail_all_pending();
            self.publish_status(false, None).await;
            info!("Worker {} detached, awaiting a new peer", peer);
        }

        self.slot.disconnect().await;
        self.router.fail_all_pending();
        debug!("Supervisor stopped");
        Ok(())
    }

    /// Poll `accept` until a peer attaches or shutdown is observed.
    async fn await_peer(&self) -> Result<Option<SocketAddr>> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(None);
            }
            match self.slot.accept(self.config.poll_interval).await {
                Ok(Some(addr)) => return Ok(Some(addr)),
                Ok(None) => continue,
                Err(BrokerError::PeerRejected { addr }) => {
                    warn!("Rejected concurrent peer {}", addr);
                    continue;
                }
                Err(e @ BrokerError::Bind { .. }) => return Err(e),
                Err(BrokerError::NotListening) => return Err(BrokerError::NotListening),
                Err(e) => {
                    error!("Accept failed: {}", e);
                    continue;
                }
            }
        }
    }

    /// Drain the slot while a peer is attached, republishing everything the
    /// router leaves unconsumed. Ends when the peer is gone or shutdown.
    async fn forward_loop(&self) {
        loop {
            let received = tokio::select! {
                received = self.slot.receive(self.config.poll_interval) => received,
                _ = self.shutdown.cancelled() => return,
            };

            let frames = match received {
                Ok(frames) => frames,
                Err(BrokerError::PeerClosed) => return,
                Err(e) => {
                    // ConnectionLost or a framing violation; the slot has
                    // already dropped the peer.
                    warn!("Forwarding loop ended: {}", e);
                    return;
                }
            };

            for frame in frames {
                match self.router.route(frame).await {
                    Ok(Some(unconsumed)) => {
                        let payload = serde_json::from_slice(&unconsumed.payload)
                            .unwrap_or_else(|_| {
                                json!({
                                    "raw": String::from_utf8_lossy(&unconsumed.payload)
                                })
                            });
                        self.sink.publish(unconsumed.kind.event_name(), payload).await;
                    }
                    Ok(None) => {}
                    Err(e) if e.is_disconnect() => return,
                    Err(e) => warn!("Failed to route inbound frame: {}", e),
                }
            }
        }
    }

    async fn publish_status(&self, connected: bool, peer: Option<SocketAddr>) {
        let payload = json!({
            "connected": connected,
            "peer": peer.map(|a| a.to_string()),
        });
        self.sink.publish("status", payload).await;
    }
}
