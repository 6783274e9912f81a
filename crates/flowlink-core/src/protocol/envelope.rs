//! JSON payload convention for method dispatch.
//!
//! Requests: `{"id": <int, optional>, "method": <string>, "params": <object>}`.
//! Responses: `{"id": <int>, "result": <any>}` or
//! `{"id": <int>, "error": {"code": <int>, "message": <string>}}`.
//!
//! Inbound payloads are classified exactly once, at the router boundary,
//! into a tagged [`Envelope`] — request vs. response is decided here, not by
//! field sniffing scattered through the routing code.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

/// Outbound request or notification payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    /// A correlated request expecting a response.
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// A fire-and-forget notification.
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Outbound response payload, correlated by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, code: i32, message: String) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcErrorObject { code, message }),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// JSON-RPC style error object carried in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i32,
    pub message: String,
}

/// A payload classified once at the router boundary.
#[derive(Debug, Clone)]
pub enum Envelope {
    /// Carries a `method` and an `id`: the peer expects a correlated reply.
    Request {
        id: u64,
        method: String,
        params: Value,
    },
    /// Carries a `method` but no `id`: no reply expected.
    Notification { method: String, params: Value },
    /// Carries an `id` but no `method`: resolves a pending local call.
    Response {
        id: u64,
        result: Option<Value>,
        error: Option<RpcErrorObject>,
    },
}

impl Envelope {
    /// Classify a payload, or `None` if it is not a dispatch envelope at
    /// all (not JSON, not an object, or neither `method` nor `id` present).
    /// Non-envelope payloads belong to the forwarding loop.
    ///
    /// Ids are non-negative integers on this wire. A request carrying any
    /// other id shape cannot be correlated, so it degrades to a notification
    /// with a debug log rather than failing the connection.
    pub fn classify(payload: &[u8]) -> Option<Envelope> {
        let value: Value = serde_json::from_slice(payload).ok()?;
        let obj = value.as_object()?;

        if let Some(method) = obj.get("method").and_then(Value::as_str) {
            let method = method.to_string();
            let params = obj.get("params").cloned().unwrap_or(Value::Null);
            return match obj.get("id") {
                Some(id) => match id.as_u64() {
                    Some(id) => Some(Envelope::Request { id, method, params }),
                    None => {
                        debug!(
                            "Request {} has non-integer id {}, treating as notification",
                            method, id
                        );
                        Some(Envelope::Notification { method, params })
                    }
                },
                None => Some(Envelope::Notification { method, params }),
            };
        }

        let id = obj.get("id").and_then(Value::as_u64)?;
        let error = obj
            .get("error")
            .cloned()
            .and_then(|e| serde_json::from_value(e).ok());
        Some(Envelope::Response {
            id,
            result: obj.get("result").cloned(),
            error,
        })
    }
}
