//! Cooperative cancellation of in-flight request handlers.

use std::sync::Arc;

use tokio::sync::watch;

/// Signals a running handler that its request was cancelled by the peer.
///
/// Clones share state. Handlers may poll [`is_cancelled`](Self::is_cancelled)
/// or await [`cancelled`](Self::cancelled); nothing forces them to stop.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Whether both handles share the same state
    pub fn same_as(&self, other: &CancellationHandle) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }

    /// Wait until cancellation is requested. Returns immediately if it already was.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once set.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_is_shared_and_idempotent() {
        let handle = CancellationHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_cancelled());

        handle.cancel();
        handle.cancel();
        assert!(clone.is_cancelled());
        assert!(clone.same_as(&handle));
        assert!(!CancellationHandle::new().same_as(&handle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_future_resolves() {
        let handle = CancellationHandle::new();
        let clone = handle.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            clone.cancel();
        });

        tokio::time::timeout(Duration::from_secs(60), handle.cancelled())
            .await
            .expect("cancelled() should resolve within timeout");
    }

    #[tokio::test]
    async fn test_cancelled_immediate_if_already_cancelled() {
        let handle = CancellationHandle::new();
        handle.cancel();

        tokio::time::timeout(Duration::from_millis(10), handle.cancelled())
            .await
            .expect("cancelled() should resolve immediately when already cancelled");
    }
}
