//! Configuration for the broker core.
//!
//! Protocol constants live in const-holder structs; runtime knobs (host,
//! port, polling, lazy startup) arrive from the embedding CLI layer in a
//! `BrokerConfig`.

use std::time::Duration;

/// Wire protocol constants shared by both ends.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Bytes in the big-endian content-length prefix.
    pub const LENGTH_PREFIX_LEN: usize = 4;
    /// Bytes reserved for the message kind inside the content.
    pub const KIND_LEN: usize = 2;
    /// Maximum payload bytes accepted in a single frame. A declared length
    /// beyond this fails the connection instead of allocating.
    pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024; // 10MB
    /// Read buffer size for a single receive poll.
    pub const READ_CHUNK_SIZE: usize = 8192;
}

/// Timing defaults for the reconnection supervisor.
pub struct SupervisorConfig;

impl SupervisorConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
}

/// Runtime configuration consumed by the broker.
///
/// Owned by the external CLI layer; see the `flowlink-rpc` binary.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Host to bind the worker-facing listener to.
    pub host: String,
    /// Port to bind (0 = OS-assigned).
    pub port: u16,
    /// Bound on a single accept/receive poll iteration.
    pub poll_interval: Duration,
    /// Defer listening until `Broker::activate` fires.
    pub lazy: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            poll_interval: SupervisorConfig::DEFAULT_POLL_INTERVAL,
            lazy: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_reasonable() {
        let config = BrokerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 0);
        assert!(!config.lazy);
        assert!(config.poll_interval > Duration::ZERO);
        assert!(ProtocolConfig::MAX_PAYLOAD_SIZE > ProtocolConfig::READ_CHUNK_SIZE);
    }
}
