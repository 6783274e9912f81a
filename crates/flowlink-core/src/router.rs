//! Request/response router.
//!
//! Correlates outbound calls with inbound responses through the pending
//! request table, and dispatches inbound requests to the method table the
//! embedding application registered. Callers never read the transport
//! directly: `call` waits on its table entry while the forwarding loop owns
//! the read path and feeds frames through [`Router::route`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::cancel::ShutdownToken;
use crate::error::{BrokerError, Result};
use crate::protocol::{Envelope, Frame, MessageKind, RpcRequest, RpcResponse};
use crate::slot::ConnectionSlot;

/// Dispatch seam for inbound method calls.
///
/// Implemented by the embedding application; the broker does not know the
/// method names in advance.
#[async_trait]
pub trait MethodDispatch: Send + Sync + 'static {
    /// Handle a method call and return its result value.
    ///
    /// Return `BrokerError::MethodNotFound` for unknown names; the router
    /// turns it into a "method not found" error response rather than a
    /// local failure.
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value>;
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
type Handler = Box<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Ready-made name-to-handler registry implementing [`MethodDispatch`].
#[derive(Default)]
pub struct MethodTable {
    handlers: HashMap<String, Handler>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a method name. A later registration under
    /// the same name replaces the earlier one.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.handlers
            .insert(name.into(), Box::new(move |params| Box::pin(handler(params))));
    }
}

#[async_trait]
impl MethodDispatch for MethodTable {
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
        match self.handlers.get(method) {
            Some(handler) => handler(params).await,
            None => Err(BrokerError::MethodNotFound {
                method: method.to_string(),
            }),
        }
    }
}

/// Routes frames between the slot, the pending table, and the method table.
pub struct Router {
    slot: Arc<ConnectionSlot>,
    dispatch: Arc<dyn MethodDispatch>,
    pending: StdMutex<HashMap<u64, oneshot::Sender<Result<Value>>>>,
    next_id: AtomicU64,
    shutdown: ShutdownToken,
}

impl Router {
    pub fn new(
        slot: Arc<ConnectionSlot>,
        dispatch: Arc<dyn MethodDispatch>,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            slot,
            dispatch,
            pending: StdMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown,
        }
    }

    fn pending_lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Result<Value>>>> {
        self.pending.lock().expect("pending table lock poisoned")
    }

    /// Number of outstanding calls.
    pub fn pending_len(&self) -> usize {
        self.pending_lock().len()
    }

    /// Send a correlated request and await its response.
    ///
    /// Resolves with the peer's `result`, the peer's `error` as a
    /// `BrokerError`, `ConnectionLost` if the peer disappears first, or
    /// `Shutdown` when the broker stops.
    pub async fn call(&self, kind: MessageKind, method: &str, params: Value) -> Result<Value> {
        self.shutdown.check()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending_lock().insert(id, tx);

        let request = RpcRequest::new(id, method, params);
        let frame = Frame::new(kind, request.to_bytes()?);
        if let Err(e) = self.slot.send(&frame).await {
            self.pending_lock().remove(&id);
            return Err(e);
        }
        debug!("Call {} dispatched as request {}", method, id);

        tokio::select! {
            resolved = rx => {
                // A dropped sender means the table was torn down without
                // resolving us explicitly; treat it as a lost connection.
                resolved.unwrap_or(Err(BrokerError::ConnectionLost))
            }
            _ = self.shutdown.cancelled() => {
                self.pending_lock().remove(&id);
                Err(BrokerError::Shutdown)
            }
        }
    }

    /// Send a notification; no table entry, no reply expected.
    pub async fn notify(&self, kind: MessageKind, method: &str, params: Value) -> Result<()> {
        let request = RpcRequest::notification(method, params);
        let frame = Frame::new(kind, request.to_bytes()?);
        self.slot.send(&frame).await
    }

    /// Route one inbound frame.
    ///
    /// Returns the frame back when it is not a dispatch envelope at all —
    /// the forwarding loop republishes those toward the UI channel.
    /// Envelopes are consumed here: responses resolve (or are dropped as
    /// stale), requests and notifications are handed to the method table on
    /// their own task, so a handler may itself issue outbound calls without
    /// stalling the read path that would deliver their responses.
    pub async fn route(self: &Arc<Self>, frame: Frame) -> Result<Option<Frame>> {
        let envelope = match Envelope::classify(&frame.payload) {
            Some(envelope) => envelope,
            None => return Ok(Some(frame)),
        };

        match envelope {
            Envelope::Response { id, result, error } => {
                let waiter = self.pending_lock().remove(&id);
                match waiter {
                    Some(tx) => {
                        let resolved = match error {
                            Some(e) => Err(BrokerError::Other(format!(
                                "{} (code {})",
                                e.message, e.code
                            ))),
                            None => Ok(result.unwrap_or(Value::Null)),
                        };
                        // The caller may have given up (shutdown); nothing
                        // left to do if the receiver is gone.
                        let _ = tx.send(resolved);
                    }
                    None => {
                        debug!("Dropping response with no pending request (id {})", id);
                    }
                }
                Ok(None)
            }
            Envelope::Request { id, method, params } => {
                let router = self.clone();
                tokio::spawn(async move {
                    router.answer_request(id, method, params).await;
                });
                Ok(None)
            }
            Envelope::Notification { method, params } => {
                let router = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = router.dispatch.dispatch(&method, params).await {
                        warn!("Inbound notification {} failed: {}", method, e);
                    }
                });
                Ok(None)
            }
        }
    }

    /// Dispatch an inbound request and send back the correlated reply.
    async fn answer_request(&self, id: u64, method: String, params: Value) {
        let response = match self.dispatch.dispatch(&method, params).await {
            Ok(result) => RpcResponse::success(id, result),
            Err(e) => {
                debug!("Inbound call {} failed: {}", method, e);
                RpcResponse::error(id, e.to_rpc_error_code(), e.to_string())
            }
        };
        let kind = if response.error.is_none() {
            MessageKind::Ok
        } else {
            MessageKind::Error
        };
        let reply = match response.to_bytes() {
            Ok(bytes) => Frame::new(kind, bytes),
            Err(e) => {
                warn!("Failed to encode reply for request {}: {}", id, e);
                return;
            }
        };
        if let Err(e) = self.slot.send(&reply).await {
            debug!("Failed to reply to request {}: {}", id, e);
        }
    }

    /// Resolve every outstanding call with `ConnectionLost` and empty the
    /// table. Called when the peer is gone; no request is left pending.
    pub fn fail_all_pending(&self) {
        let drained: Vec<_> = {
            let mut pending = self.pending_lock();
            pending.drain().collect()
        };
        if !drained.is_empty() {
            debug!("Failing {} pending request(s): connection lost", drained.len());
        }
        for (_id, tx) in drained {
            let _ = tx.send(Err(BrokerError::ConnectionLost));
        }
    }
}
