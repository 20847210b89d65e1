//! Consecutive-failure circuit breaker for the executor.
//!
//! Trips after N consecutive failures and refuses work until the reset
//! window passes, then allows a single probe (half-open). A success in any
//! state closes it.

use std::time::{Duration, Instant};
use tracing::warn;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker with a timed half-open probe.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_after: Duration,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probing: bool,
}

impl CircuitBreaker {
    /// Creates a breaker tripping after `failure_threshold` consecutive
    /// failures and resetting after `reset_after`.
    #[must_use]
    pub fn new(failure_threshold: u32, reset_after: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_after,
            consecutive_failures: 0,
            opened_at: None,
            probing: false,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        match self.opened_at {
            None => BreakerState::Closed,
            Some(at) if at.elapsed() >= self.reset_after => BreakerState::HalfOpen,
            Some(_) => BreakerState::Open,
        }
    }

    /// Whether an execution may proceed. In half-open, the first caller
    /// gets the probe; others wait for its verdict.
    pub fn allow(&mut self) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if self.probing {
                    false
                } else {
                    self.probing = true;
                    true
                }
            }
        }
    }

    /// Records a successful execution, closing the breaker.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.probing = false;
    }

    /// Records a failed execution; may trip the breaker.
    pub fn record_failure(&mut self) {
        self.probing = false;
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.failure_threshold {
            if self.opened_at.is_none() {
                warn!(
                    failures = self.consecutive_failures,
                    "circuit breaker tripped"
                );
            }
            self.opened_at = Some(Instant::now());
        }
    }

    /// Consecutive failure count.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(120))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_allows() {
        let mut b = CircuitBreaker::new(3, Duration::from_secs(60));
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.allow());
    }

    #[test]
    fn trips_after_threshold() {
        let mut b = CircuitBreaker::new(2, Duration::from_secs(60));
        b.record_failure();
        assert!(b.allow());
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());
    }

    #[test]
    fn success_resets_count() {
        let mut b = CircuitBreaker::new(2, Duration::from_secs(60));
        b.record_failure();
        b.record_success();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_allows_single_probe() {
        let mut b = CircuitBreaker::new(1, Duration::from_millis(0));
        b.record_failure();
        // Zero reset window: immediately half-open.
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(b.allow());
        // Second caller blocked while the probe is out.
        assert!(!b.allow());

        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.allow());
    }

    #[test]
    fn failed_probe_reopens() {
        let mut b = CircuitBreaker::new(1, Duration::from_millis(0));
        b.record_failure();
        assert!(b.allow());
        b.record_failure();
        // Re-opened with a fresh window (zero here, so half-open again).
        assert_eq!(b.state(), BreakerState::HalfOpen);
    }
}
