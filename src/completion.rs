//! One-shot bridge from hardware callbacks to awaiting tasks
//!
//! A [`Completion`] is settled at most once: by the hardware callback
//! (`resolve`), by teardown (`cancel`) or by the waiter giving up after its
//! timeout. Whoever settles first wins. Every later attempt, and any
//! attempt after the waiter was dropped, returns `false` so the caller can
//! release whatever late resource it was carrying.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

enum Settled<T> {
    Value(T),
    Cancelled,
}

/// Why a wait ended without a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    Cancelled,
    TimedOut,
    /// `wait` was already called on this completion
    AlreadyAwaited,
}

pub struct Completion<T> {
    sender: Mutex<Option<oneshot::Sender<Settled<T>>>>,
    receiver: Mutex<Option<oneshot::Receiver<Settled<T>>>>,
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Completion<T> {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
        }
    }

    /// Deliver the outcome. Returns `false` if already settled or if the
    /// waiter is gone.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Settled::Value(value))
    }

    /// Short-circuit the wait. Returns `false` if already settled.
    pub fn cancel(&self) -> bool {
        self.settle(Settled::Cancelled)
    }

    pub fn is_settled(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn settle(&self, outcome: Settled<T>) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // A waiter that went away never sees the value: report it unclaimed
        sender.is_some_and(|tx| tx.send(outcome).is_ok())
    }

    /// Wait for the outcome, settling the completion as timed out if
    /// nothing arrives within `timeout`.
    pub async fn wait(&self, timeout: Duration) -> Result<T, WaitError> {
        let mut rx = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(WaitError::AlreadyAwaited)?;

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(Settled::Value(value))) => Ok(value),
            Ok(Ok(Settled::Cancelled)) | Ok(Err(_)) => Err(WaitError::Cancelled),
            Err(_) => {
                // Claim the slot so a late callback sees it as settled. If the
                // callback won the race, its value is already in the channel.
                if self.settle_timed_out() {
                    return Err(WaitError::TimedOut);
                }
                match rx.try_recv() {
                    Ok(Settled::Value(value)) => Ok(value),
                    Ok(Settled::Cancelled) => Err(WaitError::Cancelled),
                    Err(_) => Err(WaitError::TimedOut),
                }
            }
        }
    }

    fn settle_timed_out(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::{assert_pending, assert_ready};

    #[tokio::test]
    async fn test_first_resolution_wins() {
        let completion = Completion::new();
        assert!(completion.resolve(1));
        assert!(!completion.resolve(2));
        assert!(!completion.cancel());
        assert_eq!(completion.wait(Duration::from_secs(1)).await, Ok(1));
    }

    #[tokio::test]
    async fn test_cancel_short_circuits_wait() {
        let completion = Arc::new(Completion::<u32>::new());
        let waiter = {
            let completion = completion.clone();
            tokio::spawn(async move { completion.wait(Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        assert!(completion.cancel());
        assert_eq!(waiter.await.unwrap(), Err(WaitError::Cancelled));
        assert!(!completion.resolve(5));
    }

    #[tokio::test]
    async fn test_timeout_rejects_late_resolution() {
        let completion = Completion::<&str>::new();
        let result = completion.wait(Duration::from_millis(10)).await;
        assert_eq!(result, Err(WaitError::TimedOut));
        assert!(completion.is_settled());
        assert!(!completion.resolve("late"));
    }

    #[tokio::test]
    async fn test_second_wait_is_rejected() {
        let completion = Completion::new();
        completion.resolve(());
        assert!(completion.wait(Duration::from_millis(10)).await.is_ok());
        assert_eq!(
            completion.wait(Duration::from_millis(10)).await,
            Err(WaitError::AlreadyAwaited)
        );
    }

    #[tokio::test]
    async fn test_resolve_after_waiter_dropped_is_unclaimed() {
        let completion = Arc::new(Completion::new());
        let mut task = tokio_test::task::spawn({
            let completion = completion.clone();
            async move { completion.wait(Duration::from_secs(30)).await }
        });
        assert_pending!(task.poll());
        drop(task);

        assert!(!completion.resolve(7u8));
        assert!(completion.is_settled());
    }

    #[tokio::test]
    async fn test_wait_stays_pending_until_resolved() {
        let completion = Arc::new(Completion::new());
        let mut task = tokio_test::task::spawn({
            let completion = completion.clone();
            async move { completion.wait(Duration::from_secs(30)).await }
        });
        assert_pending!(task.poll());
        completion.resolve(42u8);
        assert!(task.is_woken());
        assert_eq!(assert_ready!(task.poll()), Ok(42));
    }
}
