//! flowlink core - single-slot message broker between a visual editor, its
//! backend, and one external worker application.
//!
//! The broker frames, routes, and correlates messages; it never interprets
//! their semantic content. Exactly one worker may be attached at a time.
//!
//! # Architecture
//!
//! - **protocol**: length-prefixed, kind-tagged binary framing (pure codec)
//!   and the JSON request/notification/response payload convention
//! - **slot**: the listening endpoint plus at most one accepted peer, as an
//!   explicit state machine
//! - **router**: correlation ids, the pending request table, and dispatch
//!   to the application-supplied method table
//! - **bridge**: the reconnection supervisor and the forwarding loop that
//!   republishes unsolicited traffic toward the UI channel
//!
//! # Example
//!
//! ```rust,ignore
//! use flowlink_core::{Broker, BrokerConfig, ConnectionSlot, MethodTable, MessageKind, ShutdownToken};
//! use std::sync::Arc;
//!
//! let slot = Arc::new(ConnectionSlot::new());
//! let shutdown = ShutdownToken::new();
//! let mut methods = MethodTable::new();
//! methods.register("echo", |params| async move { Ok(params) });
//!
//! let broker = Arc::new(Broker::new(
//!     BrokerConfig::default(),
//!     slot,
//!     Arc::new(methods),
//!     ui_sink,
//!     shutdown,
//! ));
//! tokio::spawn({
//!     let broker = broker.clone();
//!     async move { broker.run().await }
//! });
//!
//! let result = broker
//!     .call(MessageKind::Run, "run_graph", serde_json::json!({}))
//!     .await?;
//! ```

pub mod bridge;
pub mod cancel;
pub mod config;
pub mod error;
pub mod protocol;
pub mod router;
pub mod slot;

// Re-export commonly used types
pub use bridge::{Broker, UiSink};
pub use cancel::ShutdownToken;
pub use config::{BrokerConfig, ProtocolConfig, SupervisorConfig};
pub use error::{BrokerError, Result};
pub use protocol::{Envelope, Frame, FrameDecoder, MessageKind, RpcErrorObject, RpcRequest, RpcResponse};
pub use router::{MethodDispatch, MethodTable, Router};
pub use slot::{ConnectionSlot, SlotState};
