//! Cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Liveness handle of the task driving a runtime
///
/// Clones share state; cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

impl CancelHandle {
    /// Handle that is not cancelled yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; does not wait for the walk to unwind
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether [`CancelHandle::cancel`] was called on any clone
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let handle = CancelHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        tokio::task::yield_now().await;
        handle.cancel();

        task.await.unwrap();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_cancelled_pending_until_cancel() {
        let handle = CancelHandle::new();
        let mut waiter = tokio_test::task::spawn(handle.cancelled());
        tokio_test::assert_pending!(waiter.poll());

        handle.cancel();
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }
}
