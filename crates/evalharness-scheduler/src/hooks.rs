//! The three optional, caller-supplied callbacks used to detect and
//! quantify a rate-limit condition from an operation's own success type.
//!
//! Modeled on the teacher's boxed-predicate style (`tower-resilience-retry`'s
//! `RetryPredicate<E>` and its `IntervalFunction`): a bundle of
//! `Option<Box<dyn Fn(...) + Send + Sync>>` rather than a trait, since
//! callers typically only want to override one or two of the three.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

type IsRateLimitedFn<R> = Box<dyn Fn(&R) -> bool + Send + Sync>;
type GetHeadersFn<R> = Box<dyn Fn(&R) -> HashMap<String, String> + Send + Sync>;
type GetRetryAfterFn<R> = Box<dyn Fn(&R) -> Option<Duration> + Send + Sync>;

/// Callbacks [`crate::Scheduler::execute_with_retry`] uses to recognize a
/// rate-limit condition in an otherwise successful result `R`.
///
/// All three are optional. Absent ones simply contribute nothing to
/// detection or quota learning; a plain substring check of the error
/// message (on the `Err(E)` path) always runs regardless of what's
/// configured here.
pub struct Hooks<R> {
    is_rate_limited: Option<IsRateLimitedFn<R>>,
    get_headers: Option<GetHeadersFn<R>>,
    get_retry_after: Option<GetRetryAfterFn<R>>,
}

impl<R> fmt::Debug for Hooks<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("is_rate_limited", &self.is_rate_limited.is_some())
            .field("get_headers", &self.get_headers.is_some())
            .field("get_retry_after", &self.get_retry_after.is_some())
            .finish()
    }
}

impl<R> Default for Hooks<R> {
    fn default() -> Self {
        Self {
            is_rate_limited: None,
            get_headers: None,
            get_retry_after: None,
        }
    }
}

impl<R> Hooks<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspects a successful result for an embedded rate-limit marker (a
    /// status code, a provider-specific error envelope, etc).
    pub fn is_rate_limited(mut self, f: impl Fn(&R) -> bool + Send + Sync + 'static) -> Self {
        self.is_rate_limited = Some(Box::new(f));
        self
    }

    /// Extracts whatever rate-limit headers the result carries, as a plain
    /// case-preserved name/value map.
    pub fn get_headers(mut self, f: impl Fn(&R) -> HashMap<String, String> + Send + Sync + 'static) -> Self {
        self.get_headers = Some(Box::new(f));
        self
    }

    /// Extracts an explicit provider-asked-for backoff floor.
    pub fn get_retry_after(
        mut self,
        f: impl Fn(&R) -> Option<Duration> + Send + Sync + 'static,
    ) -> Self {
        self.get_retry_after = Some(Box::new(f));
        self
    }

    pub(crate) fn call_is_rate_limited(&self, result: &R) -> bool {
        self.is_rate_limited.as_ref().is_some_and(|f| f(result))
    }

    pub(crate) fn call_get_headers(&self, result: &R) -> HashMap<String, String> {
        self.get_headers
            .as_ref()
            .map(|f| f(result))
            .unwrap_or_default()
    }

    pub(crate) fn call_get_retry_after(&self, result: &R) -> Option<Duration> {
        self.get_retry_after.as_ref().and_then(|f| f(result))
    }
}

/// Case-insensitive substring check against a handful of common rate-limit
/// phrasings, run against an operation error's `Display` output. This is
/// the one detection path that needs no hook at all.
pub fn message_indicates_rate_limit(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    const NEEDLES: &[&str] = &["rate limit", "ratelimit", "429", "too many requests"];
    NEEDLES.iter().any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Response {
        status: u16,
    }

    #[test]
    fn default_hooks_detect_nothing() {
        let hooks: Hooks<Response> = Hooks::new();
        let r = Response { status: 429 };
        assert!(!hooks.call_is_rate_limited(&r));
        assert!(hooks.call_get_headers(&r).is_empty());
        assert!(hooks.call_get_retry_after(&r).is_none());
    }

    #[test]
    fn configured_is_rate_limited_hook_runs() {
        let hooks = Hooks::new().is_rate_limited(|r: &Response| r.status == 429);
        assert!(hooks.call_is_rate_limited(&Response { status: 429 }));
        assert!(!hooks.call_is_rate_limited(&Response { status: 200 }));
    }

    #[test]
    fn message_detection_matches_common_phrasings() {
        assert!(message_indicates_rate_limit("Error: Rate limit exceeded"));
        assert!(message_indicates_rate_limit("HTTP 429 received"));
        assert!(message_indicates_rate_limit("Too Many Requests"));
        assert!(!message_indicates_rate_limit("connection refused"));
    }
}
