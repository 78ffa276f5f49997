//! Parsing for the rate-limit header families a provider response may
//! carry, plus the `Retry-After`/duration/HTTP-date value grammars.
//!
//! Grounded in the header-tracking style of
//! `other_examples/096ef147_jscraik-Cortex-OS__apps-cortex-code-backup-src-github-rate_limiter.rs.rs`
//! (which tracks `remaining`/`reset` off a GitHub response), generalized to
//! the multi-provider header family list in the spec.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// Everything the scheduler could extract from one response's headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedQuota {
    pub remaining_requests: Option<u64>,
    pub limit_requests: Option<u64>,
    pub remaining_tokens: Option<u64>,
    pub limit_tokens: Option<u64>,
    /// Absolute wall-clock reset time, if derivable.
    pub reset_at: Option<SystemTime>,
    /// Minimum backoff floor asked for explicitly by the provider.
    pub retry_after: Option<Duration>,
}

impl ParsedQuota {
    /// `remaining / limit`, when both are present and `limit > 0`.
    pub fn remaining_ratio(&self) -> Option<f64> {
        match (self.remaining_requests, self.limit_requests) {
            (Some(remaining), Some(limit)) if limit > 0 => {
                Some(remaining as f64 / limit as f64)
            }
            _ => None,
        }
    }
}

const REQUEST_REMAINING_KEYS: &[&str] = &[
    "x-ratelimit-remaining-requests",
    "x-ratelimit-remaining",
    "anthropic-ratelimit-requests-remaining",
    "ratelimit-remaining",
];

const REQUEST_LIMIT_KEYS: &[&str] = &[
    "x-ratelimit-limit-requests",
    "x-ratelimit-limit",
    "anthropic-ratelimit-requests-limit",
    "ratelimit-limit",
];

const TOKEN_REMAINING_KEYS: &[&str] = &[
    "x-ratelimit-remaining-tokens",
    "anthropic-ratelimit-tokens-remaining",
    "ratelimit-remaining-tokens",
];

const TOKEN_LIMIT_KEYS: &[&str] = &[
    "x-ratelimit-limit-tokens",
    "anthropic-ratelimit-tokens-limit",
    "ratelimit-limit-tokens",
];

const RESET_KEYS: &[&str] = &[
    "x-ratelimit-reset-requests",
    "x-ratelimit-reset",
    "anthropic-ratelimit-requests-reset",
    "ratelimit-reset",
];

/// Case-insensitive lookup of the first header in `keys` present in
/// `headers`, returning its raw value.
fn first_present<'a>(headers: &'a HashMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    for key in keys {
        for (header_name, value) in headers.iter() {
            if header_name.eq_ignore_ascii_case(key) {
                return Some(value.as_str());
            }
        }
    }
    None
}

/// Non-negative integer counters: rejects non-integer and negative values;
/// zero is valid ("immediate").
fn parse_counter(raw: &str) -> Option<u64> {
    raw.trim().parse::<i64>().ok().and_then(|n| {
        if n >= 0 {
            Some(n as u64)
        } else {
            None
        }
    })
}

/// One unix-timestamp-vs-relative-seconds heuristic boundary: values at or
/// above this look like an absolute unix timestamp in seconds (the year
/// 2001 epoch boundary), rather than a short relative delta. Documented as
/// an open-question resolution in DESIGN.md.
const ABSOLUTE_SECONDS_FLOOR: i64 = 1_000_000_000;
/// Above this, a plain integer reset value is actually milliseconds.
const MILLISECONDS_FLOOR: i64 = 10_000_000_000;

fn parse_reset_value(raw: &str, now: SystemTime) -> Option<SystemTime> {
    let trimmed = raw.trim();

    if let Ok(n) = trimmed.parse::<i64>() {
        if n < 0 {
            return None;
        }
        if n >= MILLISECONDS_FLOOR {
            return SystemTime::UNIX_EPOCH.checked_add(Duration::from_millis(n as u64));
        }
        if n >= ABSOLUTE_SECONDS_FLOOR {
            return SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(n as u64));
        }
        // A short relative integer: seconds-from-now.
        return now.checked_add(Duration::from_secs(n as u64));
    }

    if let Some(duration) = parse_duration_string(trimmed) {
        return now.checked_add(duration);
    }

    if let Ok(http_date) = httpdate::parse_http_date(trimmed) {
        let within_range = http_date
            .duration_since(now)
            .map(|d| d <= Duration::from_secs(365 * 24 * 3600))
            .unwrap_or_else(|_| {
                now.duration_since(http_date)
                    .map(|d| d <= Duration::from_secs(365 * 24 * 3600))
                    .unwrap_or(false)
            });
        if within_range {
            return Some(http_date);
        }
    }

    None
}

/// Parses a duration string with additive `ms|s|m|h` components, e.g.
/// `"1h30m5s"`. Returns `None` if nothing recognizable was consumed.
pub fn parse_duration_string(raw: &str) -> Option<Duration> {
    let mut remaining = raw.trim();
    if remaining.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut consumed_any = false;

    while !remaining.is_empty() {
        let digits_end = remaining
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(remaining.len());
        if digits_end == 0 {
            return None;
        }
        let (number_str, rest) = remaining.split_at(digits_end);
        let number: u64 = number_str.parse().ok()?;

        // Units are checked longest-first so "ms" isn't swallowed by "m".
        let (unit, rest) = if let Some(r) = rest.strip_prefix("ms") {
            ("ms", r)
        } else if let Some(r) = rest.strip_prefix('s') {
            ("s", r)
        } else if let Some(r) = rest.strip_prefix('m') {
            ("m", r)
        } else if let Some(r) = rest.strip_prefix('h') {
            ("h", r)
        } else {
            return None;
        };

        let component = match unit {
            "ms" => Duration::from_millis(number),
            "s" => Duration::from_secs(number),
            "m" => Duration::from_secs(number * 60),
            "h" => Duration::from_secs(number * 3600),
            _ => unreachable!(),
        };

        total += component;
        consumed_any = true;
        remaining = rest;
    }

    consumed_any.then_some(total)
}

/// Parses `retry-after-ms` (wins) or `retry-after` (seconds, or HTTP-date).
fn parse_retry_after(headers: &HashMap<String, String>, now: SystemTime) -> Option<Duration> {
    if let Some(raw) = first_present(headers, &["retry-after-ms"]) {
        if let Ok(ms) = raw.trim().parse::<i64>() {
            if ms >= 0 {
                return Some(Duration::from_millis(ms as u64));
            }
        }
    }

    let raw = first_present(headers, &["retry-after"])?;
    let trimmed = raw.trim();

    if let Ok(secs) = trimmed.parse::<i64>() {
        if secs >= 0 {
            return Some(Duration::from_secs(secs as u64));
        }
        return None;
    }

    let http_date = httpdate::parse_http_date(trimmed).ok()?;
    Some(http_date.duration_since(now).unwrap_or(Duration::ZERO))
}

/// Parses every recognized header family out of a non-empty header map.
/// Returns `None` unchanged (an empty `ParsedQuota`) for an empty map, per
/// spec ("When `getHeaders` returns a non-empty mapping...").
pub fn parse_headers(headers: &HashMap<String, String>, now: SystemTime) -> ParsedQuota {
    if headers.is_empty() {
        return ParsedQuota::default();
    }

    ParsedQuota {
        remaining_requests: first_present(headers, REQUEST_REMAINING_KEYS).and_then(parse_counter),
        limit_requests: first_present(headers, REQUEST_LIMIT_KEYS).and_then(parse_counter),
        remaining_tokens: first_present(headers, TOKEN_REMAINING_KEYS).and_then(parse_counter),
        limit_tokens: first_present(headers, TOKEN_LIMIT_KEYS).and_then(parse_counter),
        reset_at: first_present(headers, RESET_KEYS).and_then(|raw| parse_reset_value(raw, now)),
        retry_after: parse_retry_after(headers, now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_headers_yield_default_quota() {
        let now = SystemTime::now();
        assert_eq!(parse_headers(&HashMap::new(), now), ParsedQuota::default());
    }

    #[test]
    fn case_insensitive_family_match_picks_first_family_member() {
        let now = SystemTime::now();
        let h = headers(&[("X-RateLimit-Remaining", "5"), ("ratelimit-remaining", "9")]);
        let parsed = parse_headers(&h, now);
        assert_eq!(parsed.remaining_requests, Some(5));
    }

    #[test]
    fn negative_counters_are_rejected_zero_is_valid() {
        let now = SystemTime::now();
        let h = headers(&[("x-ratelimit-remaining", "-1")]);
        assert_eq!(parse_headers(&h, now).remaining_requests, None);

        let h2 = headers(&[("x-ratelimit-remaining", "0")]);
        assert_eq!(parse_headers(&h2, now).remaining_requests, Some(0));
    }

    #[test]
    fn remaining_ratio_computed_from_remaining_and_limit() {
        let now = SystemTime::now();
        let h = headers(&[("x-ratelimit-remaining", "5"), ("x-ratelimit-limit", "100")]);
        let parsed = parse_headers(&h, now);
        assert!((parsed.remaining_ratio().unwrap() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn short_relative_reset_integer_is_seconds_from_now() {
        let now = SystemTime::now();
        let h = headers(&[("x-ratelimit-reset", "30")]);
        let parsed = parse_headers(&h, now);
        let reset = parsed.reset_at.unwrap();
        let delta = reset.duration_since(now).unwrap();
        assert!(delta >= Duration::from_secs(29) && delta <= Duration::from_secs(31));
    }

    #[test]
    fn duration_string_reset_is_additive() {
        let now = SystemTime::now();
        let h = headers(&[("ratelimit-reset", "1h30m5s")]);
        let parsed = parse_headers(&h, now);
        let reset = parsed.reset_at.unwrap();
        let delta = reset.duration_since(now).unwrap();
        let expected = Duration::from_secs(3600 + 30 * 60 + 5);
        assert!(delta.as_secs().abs_diff(expected.as_secs()) <= 1);
    }

    #[test]
    fn parse_duration_string_rejects_garbage() {
        assert_eq!(parse_duration_string(""), None);
        assert_eq!(parse_duration_string("abc"), None);
        assert_eq!(parse_duration_string("5x"), None);
    }

    #[test]
    fn retry_after_ms_wins_over_seconds() {
        let now = SystemTime::now();
        let h = headers(&[("retry-after-ms", "1500"), ("retry-after", "10")]);
        assert_eq!(parse_retry_after(&h, now), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn retry_after_seconds_fallback() {
        let now = SystemTime::now();
        let h = headers(&[("retry-after", "7")]);
        assert_eq!(parse_retry_after(&h, now), Some(Duration::from_secs(7)));
    }

    #[test]
    fn absolute_unix_millis_reset_is_respected() {
        let now = SystemTime::now();
        let future_ms = now
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64
            + 120_000;
        let h = headers(&[("x-ratelimit-reset", &future_ms.to_string())]);
        let parsed = parse_headers(&h, now);
        let reset = parsed.reset_at.unwrap();
        let delta = reset.duration_since(now).unwrap();
        assert!(delta >= Duration::from_secs(110) && delta <= Duration::from_secs(130));
    }

    #[test]
    fn absolute_unix_seconds_reset_is_respected() {
        let now = SystemTime::now();
        let future_secs = now
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 120;
        let h = headers(&[("x-ratelimit-reset", &future_secs.to_string())]);
        let parsed = parse_headers(&h, now);
        let reset = parsed.reset_at.unwrap();
        let delta = reset.duration_since(now).unwrap();
        assert!(delta >= Duration::from_secs(110) && delta <= Duration::from_secs(130));
    }
}
