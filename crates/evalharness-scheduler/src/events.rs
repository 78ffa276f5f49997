//! The event type published to a [`evalharness_core::EventBus`] by a
//! [`crate::Scheduler`]. One variant per emitted event name in the spec;
//! `#[non_exhaustive]` so a new reason/event doesn't break downstream
//! `match`es.

use std::time::Duration;

/// Why a concurrency cap changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyChangeReason {
    /// A confirmed rate-limit hit; cap halved.
    RateLimitHit,
    /// Five consecutive successes; cap increased toward `initial`.
    Recovery,
    /// Header-derived remaining ratio fell under the proactive-throttle
    /// threshold before an actual rate-limit hit occurred.
    ProactiveThrottle,
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SchedulerEvent {
    SlotAcquired {
        endpoint: String,
        active_requests: usize,
        max_concurrency: usize,
    },
    SlotReleased {
        endpoint: String,
        active_requests: usize,
    },
    RateLimitHit {
        endpoint: String,
        attempt: u32,
        retry_after: Option<Duration>,
    },
    RateLimitWarning {
        endpoint: String,
        remaining_ratio: f64,
    },
    RateLimitLearned {
        endpoint: String,
        limit_requests: Option<u64>,
        limit_tokens: Option<u64>,
    },
    RequestRetrying {
        endpoint: String,
        attempt: u32,
        delay: Duration,
    },
    ConcurrencyDecreased {
        endpoint: String,
        from: usize,
        to: usize,
        reason: ConcurrencyChangeReason,
    },
    ConcurrencyIncreased {
        endpoint: String,
        from: usize,
        to: usize,
        reason: ConcurrencyChangeReason,
    },
}
