//! Exponential backoff and bounded polling.
//!
//! [`BackoffPolicy::execute`] retries a fallible call while its error is
//! retryable; [`PollPolicy::until`] repeats a probe at a fixed interval until
//! it reports readiness. Both are bounded by the [`CallContext`] deadline and
//! wake immediately on cancellation.

use crate::context::CallContext;
use crate::error::{ApiError, ApiResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retry policy for remote calls.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay ceiling for the first retry.
    pub initial_delay: Duration,
    /// Growth factor of the ceiling per attempt.
    pub multiplier: u32,
    /// Upper bound on a single delay.
    pub max_delay: Duration,
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Full jitter: draw each delay uniformly from `[0, ceiling]`.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Policy with the given attempt cap and single-delay cap.
    #[must_use]
    pub fn new(max_attempts: u32, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            max_delay,
            ..Self::default()
        }
    }

    /// Same policy without jitter, so delays are exactly the ceilings.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay ceiling for the given zero-based retry number:
    /// `min(initial * multiplier^attempt, max_delay)`.
    #[must_use]
    pub fn ceiling_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before the given zero-based retry, honouring a server-imposed
    /// floor such as a rate-limit reset.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, floor: Option<Duration>) -> Duration {
        let ceiling = self.ceiling_for(attempt);
        let delay = if self.jitter && !ceiling.is_zero() {
            let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
            Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
        } else {
            ceiling
        };
        match floor {
            Some(floor) => delay.max(floor),
            None => delay,
        }
    }

    /// Execute `f` until it succeeds, fails with a non-retryable error, runs
    /// out of attempts, or would sleep past the context deadline.
    pub async fn execute<F, Fut, T>(&self, ctx: &CallContext, operation: &str, f: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        self.execute_when(ctx, operation, ApiError::is_retryable, f)
            .await
    }

    /// Like [`execute`](Self::execute) with a caller-supplied retry predicate.
    pub async fn execute_when<F, Fut, T, P>(
        &self,
        ctx: &CallContext,
        operation: &str,
        should_retry: P,
        mut f: F,
    ) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
        P: Fn(&ApiError) -> bool,
    {
        let mut attempt: u32 = 0;
        loop {
            ctx.ensure_active()?;
            let error = match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            operation = operation,
                            attempts = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !should_retry(&error) {
                return Err(error);
            }

            let attempts = attempt + 1;
            if attempts >= self.max_attempts {
                warn!(
                    operation = operation,
                    attempts = attempts,
                    error = %error,
                    "Max retries exceeded"
                );
                return Err(exhausted(operation, attempts, &error));
            }

            let delay = self.delay_for(attempt, error.retry_after());
            if Instant::now() + delay >= ctx.deadline() {
                warn!(
                    operation = operation,
                    attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retry would exceed the operation deadline"
                );
                return Err(exhausted(operation, attempts, &error));
            }

            debug!(
                operation = operation,
                attempt = attempts,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after transient error"
            );
            ctx.sleep(delay).await?;
            attempt += 1;
        }
    }
}

fn exhausted(operation: &str, attempts: u32, error: &ApiError) -> ApiError {
    ApiError::RetriesExhausted {
        operation: operation.to_string(),
        attempts,
        last_class: error.class(),
        message: error.to_string(),
    }
}

/// Outcome of one convergence probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// Target state reached.
    Ready(T),
    /// Not there yet; the string describes what was observed.
    Pending(String),
}

/// Fixed-interval poll bounded by a timeout.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Run `probe` until it returns [`Probe::Ready`].
    ///
    /// The effective deadline is the earlier of `timeout` and the context
    /// deadline. Probe errors end the poll immediately.
    pub async fn until<F, Fut, T>(&self, ctx: &CallContext, operation: &str, mut probe: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<Probe<T>>>,
    {
        let started = Instant::now();
        let deadline = (started + self.timeout).min(ctx.deadline());
        let mut polls: u32 = 0;
        loop {
            ctx.ensure_active()?;
            polls += 1;
            let last_observed = match probe().await? {
                Probe::Ready(value) => {
                    if polls > 1 {
                        debug!(
                            operation = operation,
                            polls = polls,
                            waited_ms = started.elapsed().as_millis() as u64,
                            "Converged"
                        );
                    }
                    return Ok(value);
                }
                Probe::Pending(observed) => observed,
            };

            if Instant::now() + self.interval >= deadline {
                warn!(
                    operation = operation,
                    polls = polls,
                    last_observed = %last_observed,
                    "Convergence deadline exceeded"
                );
                return Err(ApiError::ConvergenceTimeout {
                    operation: operation.to_string(),
                    waited: started.elapsed(),
                    last_observed,
                });
            }

            debug!(
                operation = operation,
                poll = polls,
                observed = %last_observed,
                "Waiting for convergence"
            );
            ctx.sleep(self.interval).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fixed(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy::new(max_attempts, Duration::from_secs(30)).without_jitter()
    }

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.multiplier, 2);
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert!(policy.jitter);
    }

    #[test]
    fn test_ceiling_grows_exponentially_and_caps() {
        let policy = fixed(10);
        assert_eq!(policy.ceiling_for(0), Duration::from_secs(1));
        assert_eq!(policy.ceiling_for(1), Duration::from_secs(2));
        assert_eq!(policy.ceiling_for(3), Duration::from_secs(8));
        assert_eq!(policy.ceiling_for(5), Duration::from_secs(30));
        assert_eq!(policy.ceiling_for(40), Duration::from_secs(30));
    }

    #[test]
    fn test_full_jitter_stays_under_ceiling() {
        let policy = BackoffPolicy::default();
        for attempt in 0..6 {
            let delay = policy.delay_for(attempt, None);
            assert!(delay <= policy.ceiling_for(attempt));
        }
    }

    #[test]
    fn test_floor_wins_over_shorter_delay() {
        let policy = fixed(5);
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(9))),
            Duration::from_secs(9)
        );
        assert_eq!(
            policy.delay_for(4, Some(Duration::from_secs(9))),
            Duration::from_secs(16)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_succeeds_after_transient_failures() {
        let ctx = CallContext::new(Duration::from_secs(120));
        let counter = Arc::new(AtomicU32::new(0));
        let calls = counter.clone();

        let result = fixed(5)
            .execute(&ctx, "test_op", move || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ApiError::Transient {
                            status: 503,
                            message: "unavailable".into(),
                            retry_after: None,
                        })
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_fails_fast_on_permanent_error() {
        let ctx = CallContext::new(Duration::from_secs(120));
        let counter = Arc::new(AtomicU32::new(0));
        let calls = counter.clone();

        let result: ApiResult<()> = fixed(5)
            .execute(&ctx, "test_op", move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::PermanentClient {
                        status: 400,
                        message: "bad request".into(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(ApiError::PermanentClient { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_reports_last_class_when_attempts_run_out() {
        let ctx = CallContext::new(Duration::from_secs(600));
        let result: ApiResult<()> = fixed(3)
            .execute(&ctx, "test_op", || async {
                Err(ApiError::RateLimited {
                    message: "slow down".into(),
                    retry_after: None,
                })
            })
            .await;

        match result {
            Err(ApiError::RetriesExhausted {
                attempts,
                last_class,
                ..
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last_class, ErrorClass::RateLimited);
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_stops_at_deadline() {
        let ctx = CallContext::new(Duration::from_secs(4));
        let counter = Arc::new(AtomicU32::new(0));
        let calls = counter.clone();

        let result: ApiResult<()> = fixed(50)
            .execute(&ctx, "test_op", move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::Transient {
                        status: 500,
                        message: "boom".into(),
                        retry_after: None,
                    })
                }
            })
            .await;

        // Delays 1s, 2s fit in 4s; the 4s delay does not.
        assert!(matches!(result, Err(ApiError::RetriesExhausted { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_ready() {
        let ctx = CallContext::new(Duration::from_secs(600));
        let counter = Arc::new(AtomicU32::new(0));
        let calls = counter.clone();

        let value = PollPolicy::new(Duration::from_secs(1), Duration::from_secs(120))
            .until(&ctx, "poll", move || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Ok(Probe::Pending("absent".into()))
                    } else {
                        Ok(Probe::Ready("present"))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "present");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_with_last_observation() {
        let ctx = CallContext::new(Duration::from_secs(600));
        let result: ApiResult<()> = PollPolicy::new(Duration::from_secs(5), Duration::from_secs(12))
            .until(&ctx, "status transition", || async {
                Ok(Probe::Pending("transitioningToStatus=ACTIVE".into()))
            })
            .await;

        match result {
            Err(ApiError::ConvergenceTimeout {
                operation,
                last_observed,
                ..
            }) => {
                assert_eq!(operation, "status transition");
                assert_eq!(last_observed, "transitioningToStatus=ACTIVE");
            }
            other => panic!("expected ConvergenceTimeout, got {other:?}"),
        }
    }
}
