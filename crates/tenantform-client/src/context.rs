//! Request-scoped deadline and cancellation.

use crate::error::{ApiError, ApiResult};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation signal shared by every remote call made on
/// behalf of one host callback.
///
/// Cloning is cheap; clones observe the same cancellation.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Instant,
}

impl CallContext {
    /// A fresh context expiring after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self::with_token(CancellationToken::new(), timeout)
    }

    /// A context expiring after `timeout` and cancelled together with `cancel`.
    #[must_use]
    pub fn with_token(cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + timeout,
        }
    }

    /// A child context whose deadline is the earlier of the parent's and
    /// `timeout` from now. Cancelling the parent cancels the child.
    #[must_use]
    pub fn child(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        Self {
            cancel: self.cancel.child_token(),
            deadline: candidate.min(self.deadline),
        }
    }

    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline (zero once it has passed).
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel this context and every child derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail with [`ApiError::Cancelled`] if the context was cancelled, or
    /// with [`ApiError::DeadlineExceeded`] once the deadline has passed.
    pub fn ensure_active(&self) -> ApiResult<()> {
        if self.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        if self.is_expired() {
            return Err(ApiError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early if the context is cancelled or its
    /// deadline passes first.
    pub async fn sleep(&self, duration: Duration) -> ApiResult<()> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ApiError::Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
            () = tokio::time::sleep_until(self.deadline) => Err(ApiError::DeadlineExceeded),
        }
    }

    /// Run `fut` unless the context is cancelled or expires first.
    pub async fn run<F, T>(&self, fut: F) -> ApiResult<T>
    where
        F: std::future::Future<Output = ApiResult<T>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ApiError::Cancelled),
            () = tokio::time::sleep_until(self.deadline) => Err(ApiError::DeadlineExceeded),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_cancel() {
        let ctx = CallContext::new(Duration::from_secs(60));
        assert!(ctx.sleep(Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_sleep() {
        let ctx = CallContext::new(Duration::from_secs(600));
        let sleeper = ctx.clone();
        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(300)).await });

        tokio::task::yield_now().await;
        ctx.cancel();

        let result = handle.await.expect("task panicked");
        assert!(matches!(result, Err(ApiError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_context_is_not_active() {
        let ctx = CallContext::new(Duration::from_secs(5));
        assert!(ctx.ensure_active().is_ok());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(ctx.is_expired());
        assert!(matches!(ctx.ensure_active(), Err(ApiError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_at_deadline() {
        let ctx = CallContext::new(Duration::from_secs(5));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ApiError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_wakes_at_deadline() {
        let ctx = CallContext::new(Duration::from_secs(2));
        let result = ctx.sleep(Duration::from_secs(30)).await;
        assert!(matches!(result, Err(ApiError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_deadline_never_outlives_parent() {
        let parent = CallContext::new(Duration::from_secs(10));
        let child = parent.child(Duration::from_secs(120));
        assert_eq!(child.deadline(), parent.deadline());

        let shorter = parent.child(Duration::from_secs(2));
        assert!(shorter.deadline() < parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_reaches_child() {
        let parent = CallContext::new(Duration::from_secs(10));
        let child = parent.child(Duration::from_secs(5));
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.ensure_active(), Err(ApiError::Cancelled)));
    }
}
