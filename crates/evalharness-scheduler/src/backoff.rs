//! Exponential backoff with jitter, grounded in
//! `tower-resilience-retry`'s `IntervalFunction` delay computation.

use std::time::Duration;

use rand::Rng;

/// `min(maxDelay, baseDelay * 2^attempt) * (1 + uniform(0, jitterFactor))`.
///
/// `attempt` is zero-based (the first retry is attempt `0`). A provider's
/// explicit `retry_after` floor, when present, is applied by the caller on
/// top of this value rather than inside it.
pub fn compute_delay(
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    attempt: u32,
) -> Duration {
    let exponential = base_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = exponential.min(max_delay);
    let jitter = rand::rng().random_range(0.0..=jitter_factor.max(0.0));
    capped.mul_f64(1.0 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_before_the_cap() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(30);
        // With zero jitter range the delay is deterministic.
        let d0 = compute_delay(base, max, 0.0, 0);
        let d1 = compute_delay(base, max, 0.0, 1);
        let d2 = compute_delay(base, max, 0.0, 2);
        assert_eq!(d0, Duration::from_millis(100));
        assert_eq!(d1, Duration::from_millis(200));
        assert_eq!(d2, Duration::from_millis(400));
    }

    #[test]
    fn delay_never_exceeds_max_delay_even_with_jitter() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(1);
        for attempt in 0..10 {
            let d = compute_delay(base, max, 0.5, attempt);
            assert!(d <= max.mul_f64(1.5));
        }
    }

    #[test]
    fn jitter_factor_of_zero_is_deterministic() {
        let base = Duration::from_millis(250);
        let max = Duration::from_secs(5);
        for _ in 0..5 {
            assert_eq!(compute_delay(base, max, 0.0, 3), Duration::from_millis(2000));
        }
    }
}
