//! Cross-crate error taxonomy.
//!
//! Individual crates keep their own `thiserror` enums at their boundary;
//! this module defines the shared classification consumed by the retry
//! policy and the execution reporting paths.

use thiserror::Error;

/// Coarse failure classification shared across the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts, 5xx, connection resets. Retried with backoff.
    TransientNetwork,
    /// HTTP 429. Retried; repeated hits widen the bucket interval.
    RateLimited,
    /// Rejected locally (bad price, tick mismatch, size below minimum). Never retried.
    Validation,
    /// An on-chain call reverted; reason carried verbatim.
    OnChainRevert,
    /// Balance or allowance too low; remediation is in the message.
    InsufficientBalance,
    /// Book snapshot exceeded its TTL at execution time.
    StaleBook,
    /// One leg of a two-leg order filled, the other did not.
    Imbalanced,
    /// Anything else; terminal.
    Other,
}

impl ErrorKind {
    /// Whether the local retry policy may re-attempt this failure.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TransientNetwork | Self::RateLimited)
    }
}

/// A classified platform error carrying its kind plus a display message.
///
/// Boundary enums convert into this when a failure crosses a crate seam
/// (executor reports, HTTP error bodies, session history).
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct PlatformError {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable detail; revert reasons are carried verbatim.
    pub message: String,
}

impl PlatformError {
    /// Creates a new classified error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a validation failure.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Shorthand for a stale-book abort.
    #[must_use]
    pub fn stale_book(age_ms: i64, ttl_ms: i64) -> Self {
        Self::new(
            ErrorKind::StaleBook,
            format!("book snapshot is {age_ms}ms old, ttl {ttl_ms}ms"),
        )
    }

    /// Whether the retry policy may re-attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::TransientNetwork.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::OnChainRevert.is_retryable());
        assert!(!ErrorKind::StaleBook.is_retryable());
        assert!(!ErrorKind::Imbalanced.is_retryable());
    }

    #[test]
    fn stale_book_message_carries_ages() {
        let err = PlatformError::stale_book(2_500, 2_000);
        assert_eq!(err.kind, ErrorKind::StaleBook);
        assert!(err.to_string().contains("2500ms"));
    }
}
