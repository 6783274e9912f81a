//! Shutdown token for cooperative cancellation.
//!
//! Every suspending broker operation (accept polling, receive polling, a
//! `call` awaiting its response) takes or observes a `ShutdownToken` and
//! unblocks promptly when it fires, instead of reading a shared "should
//! stop" flag at ad hoc points.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::{BrokerError, Result};

/// A clonable shutdown token shared across the broker's tasks.
///
/// All clones observe a `cancel()` issued on any of them. Unlike a plain
/// atomic flag, the token can be awaited, so poll loops can `select!` on it.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    /// Create a new token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. All clones observe it; waiters are woken.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check whether shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown is requested. Returns immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        // Register before re-checking the flag so a concurrent cancel()
        // between the check and the await cannot be missed.
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Check cancellation at a poll boundary, erroring if shut down.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(BrokerError::Shutdown)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_not_cancelled() {
        let token = ShutdownToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_cancel_observed_by_clones() {
        let token = ShutdownToken::new();
        let clone = token.clone();

        token.cancel();

        assert!(token.is_cancelled());
        assert!(clone.is_cancelled());
        assert!(matches!(clone.check(), Err(BrokerError::Shutdown)));
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let token = ShutdownToken::new();
        token.cancel();
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = ShutdownToken::new();
        let waiter = token.clone();

        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });

        tokio::task::yield_now().await;
        token.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .expect("waiter task should not panic");
    }
}
