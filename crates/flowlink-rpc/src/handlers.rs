//! Built-in method table and the logging UI sink for the standalone daemon.
//!
//! The embedding editor backend registers its own methods and supplies a
//! real UI socket; the daemon ships just enough to be probed and stopped.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use flowlink_core::{ConnectionSlot, MethodTable, ShutdownToken, UiSink};

/// Build the daemon's built-in method table.
pub fn build_method_table(slot: Arc<ConnectionSlot>, shutdown: ShutdownToken) -> MethodTable {
    let mut table = MethodTable::new();

    table.register("health_check", |_params| async move {
        Ok(json!({"status": "ok"}))
    });

    table.register("get_connection_status", move |_params| {
        let slot = slot.clone();
        async move {
            Ok(json!({
                "state": slot.state().as_str(),
                "listen_addr": slot.local_addr().map(|a| a.to_string()),
            }))
        }
    });

    table.register("shutdown", move |_params| {
        let shutdown = shutdown.clone();
        async move {
            shutdown.cancel();
            Ok(json!({"status": "shutting_down"}))
        }
    });

    table
}

/// UI sink that logs published events.
///
/// Stands in for the browser-side live socket when the daemon runs
/// standalone.
pub struct LogSink;

#[async_trait]
impl UiSink for LogSink {
    async fn publish(&self, event: &str, payload: Value) {
        info!("UI event {}: {}", event, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowlink_core::MethodDispatch;

    #[tokio::test]
    async fn test_health_check() {
        let table = build_method_table(Arc::new(ConnectionSlot::new()), ShutdownToken::new());
        let result = table.dispatch("health_check", json!({})).await.unwrap();
        assert_eq!(result["status"], "ok");
    }

    #[tokio::test]
    async fn test_connection_status_reports_slot_state() {
        let slot = Arc::new(ConnectionSlot::new());
        let table = build_method_table(slot.clone(), ShutdownToken::new());

        let result = table
            .dispatch("get_connection_status", json!({}))
            .await
            .unwrap();
        assert_eq!(result["state"], "idle");
        assert!(result["listen_addr"].is_null());

        slot.listen("127.0.0.1", 0).await.unwrap();
        let result = table
            .dispatch("get_connection_status", json!({}))
            .await
            .unwrap();
        assert_eq!(result["state"], "listening");
        assert!(result["listen_addr"].is_string());
    }

    #[tokio::test]
    async fn test_shutdown_method_cancels_token() {
        let shutdown = ShutdownToken::new();
        let table = build_method_table(Arc::new(ConnectionSlot::new()), shutdown.clone());

        table.dispatch("shutdown", json!({})).await.unwrap();
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_unknown_method_rejected() {
        let table = build_method_table(Arc::new(ConnectionSlot::new()), ShutdownToken::new());
        let err = table.dispatch("nope", json!({})).await.unwrap_err();
        assert_eq!(err.to_rpc_error_code(), -32601);
    }
}
