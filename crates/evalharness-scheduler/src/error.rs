//! Error kinds for [`crate::Scheduler::execute_with_retry`].

use std::fmt;

/// What `execute_with_retry` can fail with.
///
/// `RateLimitExhausted` and `Operation` both carry the user operation's own
/// error type `E`; they are kept distinct so callers can tell "we detected
/// rate-limiting and ran out of retries" apart from "the operation failed
/// for an unrelated reason and was never retried". `RateLimitExhausted`'s
/// payload is optional because a rate limit can be detected on a
/// *successful* result (a non-throwing client that returns a 429 response
/// object rather than raising), in which case there is no operation error
/// to carry.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError<E> {
    /// `maxRetries` was exhausted while the operation kept indicating a
    /// rate-limit condition; carries the last observed error, if any.
    #[error("rate limit retries exhausted")]
    RateLimitExhausted(#[source] Option<E>),

    /// The caller's cancellation token fired while a slot was being
    /// awaited, the request was sleeping, or a retry backoff was in
    /// progress. Distinct from a rate-limit error; metrics only increment
    /// `failed_requests`.
    #[error("request cancelled")]
    Cancelled,

    /// A non-rate-limit error from the user operation, propagated as-is.
    #[error("operation failed")]
    Operation(#[source] E),
}

impl<E> SchedulerError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SchedulerError::Cancelled)
    }

    pub fn is_rate_limit_exhausted(&self) -> bool {
        matches!(self, SchedulerError::RateLimitExhausted(_))
    }

    /// The inner operation error, if any (absent for `Cancelled`, and for a
    /// `RateLimitExhausted` detected on a successful-but-rate-limited
    /// result).
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            SchedulerError::RateLimitExhausted(e) => e,
            SchedulerError::Operation(e) => Some(e),
            SchedulerError::Cancelled => None,
        }
    }
}

/// Minimal marker used internally where an error type isn't otherwise
/// available (e.g. cancellation detected before the operation ever ran).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cancelled")
    }
}

impl std::error::Error for Cancelled {}
