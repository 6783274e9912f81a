//! Error types for the flowlink broker.
//!
//! Transport-level failures never propagate as panics; every waiting
//! component (supervisor, router, or an individual `call`) observes them as
//! a typed `BrokerError`. Only `Bind` at startup is allowed to abort the
//! process.

use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    // Listener lifecycle
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection slot is not listening")]
    NotListening,

    #[error("Peer {addr} rejected: a peer is already connected")]
    PeerRejected { addr: SocketAddr },

    // Protocol violations
    #[error("Frame declares {declared} content bytes, maximum is {max}")]
    FrameTooLarge { declared: usize, max: usize },

    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    // Peer lifecycle
    #[error("Connection lost")]
    ConnectionLost,

    #[error("Peer closed the connection")]
    PeerClosed,

    // Method dispatch
    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Transport I/O
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Broker is shutting down")]
    Shutdown,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        BrokerError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BrokerError {
    /// Convert to a JSON-RPC error code for a response frame.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Connection lost / peer closed
    /// - -32001: Protocol violation
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            BrokerError::Json { .. } => -32700,
            BrokerError::MethodNotFound { .. } => -32601,
            BrokerError::InvalidParams { .. } => -32602,
            BrokerError::ConnectionLost | BrokerError::PeerClosed => -32000,
            BrokerError::FrameTooLarge { .. } | BrokerError::MalformedFrame { .. } => -32001,
            _ => -32603,
        }
    }

    /// Whether this error should abort startup rather than be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrokerError::Bind { .. })
    }

    /// Whether this error means the peer is gone and pending callers must
    /// be resolved.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, BrokerError::ConnectionLost | BrokerError::PeerClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrokerError::MethodNotFound {
            method: "run_graph".into(),
        };
        assert_eq!(err.to_string(), "Method not found: run_graph");
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            BrokerError::MethodNotFound {
                method: "x".into()
            }
            .to_rpc_error_code(),
            -32601
        );
        assert_eq!(BrokerError::ConnectionLost.to_rpc_error_code(), -32000);
        assert_eq!(
            BrokerError::FrameTooLarge {
                declared: 100,
                max: 10
            }
            .to_rpc_error_code(),
            -32001
        );
        assert_eq!(BrokerError::Shutdown.to_rpc_error_code(), -32603);
    }

    #[test]
    fn test_fatal_errors() {
        let bind = BrokerError::Bind {
            addr: "127.0.0.1:80".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(bind.is_fatal());
        assert!(!BrokerError::PeerClosed.is_fatal());
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(BrokerError::ConnectionLost.is_disconnect());
        assert!(BrokerError::PeerClosed.is_disconnect());
        assert!(!BrokerError::NotListening.is_disconnect());
    }
}
