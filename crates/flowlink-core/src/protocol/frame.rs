//! Binary framing for the broker wire protocol.
//!
//! Wire format:
//! ```text
//! [u32 BE: content_length][u16 BE: kind][content_length - 2 bytes payload]
//! ```
//!
//! `content_length` counts the kind bytes plus the payload, so an empty
//! payload is a valid frame with `content_length == 2`. The codec is pure:
//! it performs no I/O and reassembles frames from arbitrarily chunked input.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::config::ProtocolConfig;
use crate::error::{BrokerError, Result};

/// Message kind tag carried in every frame.
///
/// Discriminants are explicitly assigned for wire stability; both ends agree
/// on this table out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    Ok = 0,
    Error = 1,
    Validate = 2,
    Specification = 3,
    Run = 4,
    Import = 5,
    Export = 6,
}

impl MessageKind {
    /// Converts a raw u16 to a message kind.
    ///
    /// Returns `None` for values outside the shared table; the connection
    /// carrying such a frame is dropped as malformed.
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(Self::Ok),
            1 => Some(Self::Error),
            2 => Some(Self::Validate),
            3 => Some(Self::Specification),
            4 => Some(Self::Run),
            5 => Some(Self::Import),
            6 => Some(Self::Export),
            _ => None,
        }
    }

    /// Event name used when republishing a frame of this kind to the UI
    /// channel.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Validate => "validate",
            Self::Specification => "specification",
            Self::Run => "run",
            Self::Import => "import",
            Self::Export => "export",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.event_name())
    }
}

/// One reassembled unit on the wire: a kind tag plus an opaque payload,
/// commonly UTF-8 JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageKind,
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame from a kind and payload bytes.
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Encode the frame to wire bytes.
    ///
    /// The payload cap applies on this side too: a frame the peer's decoder
    /// would reject as `FrameTooLarge` is refused here before any bytes hit
    /// the wire, instead of poisoning the connection.
    pub fn encode(&self) -> Result<BytesMut> {
        if self.payload.len() > ProtocolConfig::MAX_PAYLOAD_SIZE {
            return Err(BrokerError::FrameTooLarge {
                declared: self.payload.len(),
                max: ProtocolConfig::MAX_PAYLOAD_SIZE,
            });
        }
        let content_len = ProtocolConfig::KIND_LEN + self.payload.len();
        let mut buf =
            BytesMut::with_capacity(ProtocolConfig::LENGTH_PREFIX_LEN + content_len);
        buf.put_u32(content_len as u32);
        buf.put_u16(self.kind as u16);
        buf.put_slice(&self.payload);
        Ok(buf)
    }
}

/// Incremental frame reassembler over a byte accumulator.
///
/// Feed it whatever the transport produced; it hands back every frame that
/// is now complete and keeps the unconsumed remainder (possibly a partial
/// next frame) buffered for the next call.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `incoming` and extract every fully-reassembled frame.
    ///
    /// An empty `incoming` is a no-op. A declared content length over the
    /// protocol maximum fails with `FrameTooLarge` before any payload
    /// allocation; a length under the kind size or an unknown kind fails
    /// with `MalformedFrame`. Either error condition means the connection
    /// must be dropped.
    pub fn feed(&mut self, incoming: &[u8]) -> Result<Vec<Frame>> {
        self.buf.extend_from_slice(incoming);

        let mut frames = Vec::new();
        loop {
            if self.buf.len() < ProtocolConfig::LENGTH_PREFIX_LEN {
                break;
            }

            let content_len =
                u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                    as usize;

            if content_len < ProtocolConfig::KIND_LEN {
                return Err(BrokerError::MalformedFrame {
                    message: format!(
                        "content length {} is smaller than the kind field",
                        content_len
                    ),
                });
            }
            let payload_len = content_len - ProtocolConfig::KIND_LEN;
            if payload_len > ProtocolConfig::MAX_PAYLOAD_SIZE {
                return Err(BrokerError::FrameTooLarge {
                    declared: payload_len,
                    max: ProtocolConfig::MAX_PAYLOAD_SIZE,
                });
            }

            if self.buf.len() < ProtocolConfig::LENGTH_PREFIX_LEN + content_len {
                break; // more bytes needed, not yet a full frame
            }

            self.buf.advance(ProtocolConfig::LENGTH_PREFIX_LEN);
            let raw_kind = self.buf.get_u16();
            let kind = MessageKind::from_u16(raw_kind).ok_or_else(|| {
                BrokerError::MalformedFrame {
                    message: format!("unknown message kind {}", raw_kind),
                }
            })?;
            let payload = self.buf.split_to(payload_len).freeze();

            frames.push(Frame { kind, payload });
        }

        Ok(frames)
    }

    /// Bytes currently buffered and not yet forming a complete frame.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}
