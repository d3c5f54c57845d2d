//! Operator cancellation.
//!
//! The transfer engines only ever observe cancellation; requests come
//! from outside (Ctrl-C in the binary, a test harness, a UI button).

use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Notify;

/// Source of operator abort requests.
#[async_trait::async_trait]
pub trait CancelSource: Send + Sync {
    /// Non-blocking poll.  Consumes at most one pending request.
    fn poll_abort_requested(&self) -> bool;

    /// Resolve once a request is pending.  Does not consume it.
    async fn wait(&self);
}

/// Counting cancellation flag shared between the requester and a transfer.
#[derive(Debug, Default)]
pub struct CancelFlag {
    pending: AtomicU32,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one abort request.
    pub fn request(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CancelSource for CancelFlag {
    fn poll_abort_requested(&self) -> bool {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.pending.load(Ordering::SeqCst) > 0 {
                return;
            }
            notified.await;
        }
    }
}

/// A source that never requests cancellation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverCancel;

#[async_trait::async_trait]
impl CancelSource for NeverCancel {
    fn poll_abort_requested(&self) -> bool {
        false
    }

    async fn wait(&self) {
        std::future::pending::<()>().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_poll_drains_one_request_per_call() {
        let flag = CancelFlag::new();
        assert!(!flag.poll_abort_requested());
        flag.request();
        flag.request();
        assert!(flag.poll_abort_requested());
        assert_eq!(flag.pending(), 1);
        assert!(flag.poll_abort_requested());
        assert!(!flag.poll_abort_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_wakes_on_request_without_consuming() {
        let flag = CancelFlag::new();
        let (_, waited) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.request();
            },
            tokio::time::timeout(Duration::from_secs(1), flag.wait()),
        );
        assert!(waited.is_ok());
        assert_eq!(flag.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_cancel_never_wakes() {
        let never = NeverCancel;
        assert!(!never.poll_abort_requested());
        assert!(tokio::time::timeout(Duration::from_secs(10), never.wait())
            .await
            .is_err());
    }
}
