//! Retry policy for transient exchange failures.
//!
//! Jittered exponential backoff: base 250ms, doubling per attempt, capped
//! at 4s, at most 3 retries. Only failures the error itself classifies as
//! retryable (transient network, 429) are re-attempted; everything else
//! surfaces immediately.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Classification hooks the policy needs from an error type.
pub trait Retryable {
    /// Whether this failure may be re-attempted.
    fn is_retryable(&self) -> bool;
    /// Whether this failure was an HTTP 429.
    fn is_rate_limited(&self) -> bool {
        false
    }
}

/// Backoff configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// First backoff delay.
    pub base_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based), with ±25% jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.75..1.25);
        exp.mul_f64(jitter).min(self.max_delay)
    }

    /// Runs `op` until it succeeds, exhausts the retry budget, or fails
    /// with a non-retryable error. `on_rate_limited` fires for every 429
    /// observed so the caller can widen its bucket.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted, or the first
    /// non-retryable error immediately.
    pub async fn run<T, E, F, Fut>(
        &self,
        mut op: F,
        mut on_rate_limited: impl FnMut(),
    ) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if err.is_rate_limited() {
                        on_rate_limited();
                    }
                    attempt += 1;
                    if !err.is_retryable() || attempt > self.max_retries {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
        rate_limited: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error")
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
        fn is_rate_limited(&self) -> bool {
            self.rate_limited
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<u32, TestError> = fast_policy()
            .run(
                move || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(7)
                    }
                },
                || {},
            )
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_budget_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<u32, TestError> = fast_policy()
            .run(
                move || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err(TestError {
                            retryable: true,
                            rate_limited: false,
                        })
                    }
                },
                || {},
            )
            .await;
        assert!(result.is_err());
        // 1 initial + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<u32, TestError> = fast_policy()
            .run(
                move || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err(TestError {
                            retryable: false,
                            rate_limited: false,
                        })
                    }
                },
                || {},
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limited_hits_callback_every_time() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let _result: Result<u32, TestError> = fast_policy()
            .run(
                move || async move {
                    Err(TestError {
                        retryable: true,
                        rate_limited: true,
                    })
                },
                move || {
                    h.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn eventual_success_returns_value() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<u32, TestError> = fast_policy()
            .run(
                move || {
                    let c = c.clone();
                    async move {
                        if c.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(TestError {
                                retryable: true,
                                rate_limited: false,
                            })
                        } else {
                            Ok(9)
                        }
                    }
                },
                || {},
            )
            .await;
        assert_eq!(result.unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::default();
        for attempt in 1..=10 {
            assert!(policy.delay_for(attempt) <= policy.max_delay);
        }
    }

    #[test]
    fn delay_grows_with_attempts() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            max_retries: 5,
        };
        // With ±25% jitter, attempt 3 (400ms nominal) always exceeds
        // attempt 1 (100ms nominal).
        assert!(policy.delay_for(3) > policy.delay_for(1));
    }
}
