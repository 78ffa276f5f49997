//! Adaptive per-endpoint rate-limit scheduling: admission control over a
//! dynamic concurrency cap, header-driven quota learning, and
//! rate-limit-aware retry with exponential backoff.
//!
//! The admission slot, concurrency-cap adjustment rules, and FIFO queueing
//! live in [`state::EndpointState`]; this module wires them to a caller's
//! async operation via [`Scheduler::execute_with_retry`].

pub mod backoff;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod hooks;
mod state;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use evalharness_core::EventBus;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "metrics")]
use metrics::counter;

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

pub use config::{EndpointOverrides, SchedulerConfig};
pub use error::SchedulerError;
pub use events::{ConcurrencyChangeReason, SchedulerEvent};
pub use hooks::Hooks;
pub use state::{EndpointMetrics, EndpointState};

/// Owns one [`state::EndpointState`] per distinct endpoint key and exposes
/// [`Scheduler::execute_with_retry`] as the sole entry point operations run
/// through.
pub struct Scheduler {
    config: SchedulerConfig,
    overrides: Mutex<HashMap<String, EndpointOverrides>>,
    registry: Mutex<HashMap<String, Arc<EndpointState>>>,
    events: EventBus<SchedulerEvent>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            overrides: Mutex::new(HashMap::new()),
            registry: Mutex::new(HashMap::new()),
            events: EventBus::new(),
        }
    }

    /// Registers per-endpoint overrides. Must be called before the first
    /// `execute_with_retry` call for that endpoint; overrides are read once
    /// when an endpoint's state is first created.
    pub async fn configure_endpoint(&self, endpoint: &str, overrides: EndpointOverrides) {
        self.overrides
            .lock()
            .await
            .insert(endpoint.to_string(), overrides);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    async fn state_for(&self, endpoint: &str) -> Arc<EndpointState> {
        let mut registry = self.registry.lock().await;
        if let Some(state) = registry.get(endpoint) {
            return Arc::clone(state);
        }
        let overrides = self.overrides.lock().await;
        let resolved = overrides.get(endpoint).cloned().unwrap_or_default();
        let state = EndpointState::new(
            endpoint.to_string(),
            resolved.resolve_min_concurrency(&self.config),
            resolved.resolve_initial_concurrency(&self.config),
        );
        registry.insert(endpoint.to_string(), Arc::clone(&state));
        state
    }

    async fn max_retries_for(&self, endpoint: &str) -> u32 {
        self.overrides
            .lock()
            .await
            .get(endpoint)
            .map(|o| o.resolve_max_retries(&self.config))
            .unwrap_or(self.config.max_retries)
    }

    /// Runs `op` under this endpoint's admission control, retrying on a
    /// detected rate-limit condition up to the endpoint's `max_retries`.
    ///
    /// Detection order per attempt: (a) `hooks.is_rate_limited` against a
    /// successful result, (b) a case-insensitive substring match against a
    /// thrown error's `Display` output, (c) headers carrying a remaining
    /// count of zero. Headers are parsed and fed into quota learning and
    /// proactive throttling whenever present, independent of whether this
    /// attempt itself was flagged as rate-limited.
    pub async fn execute_with_retry<R, E, F, Fut>(
        &self,
        endpoint: &str,
        hooks: &Hooks<R>,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<R, SchedulerError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: std::fmt::Display,
    {
        let state = self.state_for(endpoint).await;
        let max_retries = self.max_retries_for(endpoint).await;
        let mut attempt: u32 = 0;

        loop {
            let permit = state
                .acquire_slot(cancel)
                .await
                .map_err(|_| SchedulerError::Cancelled)?;
            #[cfg(feature = "tracing")]
            debug!(
                endpoint = %endpoint,
                active_requests = state.active_requests(),
                max_concurrency = state.max_concurrency(),
                "slot acquired"
            );
            self.events.emit(SchedulerEvent::SlotAcquired {
                endpoint: endpoint.to_string(),
                active_requests: state.active_requests(),
                max_concurrency: state.max_concurrency(),
            });

            let started_at = Instant::now();
            let outcome = op().await;
            let elapsed = started_at.elapsed();
            drop(permit);
            #[cfg(feature = "tracing")]
            debug!(endpoint = %endpoint, active_requests = state.active_requests(), "slot released");
            self.events.emit(SchedulerEvent::SlotReleased {
                endpoint: endpoint.to_string(),
                active_requests: state.active_requests(),
            });

            {
                let mut metrics = state.metrics.lock().await;
                metrics.total_requests += 1;
                metrics.record_latency(elapsed);
            }
            #[cfg(feature = "metrics")]
            counter!("scheduler_requests_total", "endpoint" => endpoint.to_string()).increment(1);

            match outcome {
                Ok(result) => {
                    let headers = hooks.call_get_headers(&result);
                    let quota = (!headers.is_empty())
                        .then(|| headers::parse_headers(&headers, SystemTime::now()));
                    self.apply_quota(endpoint, &state, quota.as_ref()).await;

                    let header_says_exhausted = quota
                        .as_ref()
                        .and_then(|q| q.remaining_requests)
                        .is_some_and(|remaining| remaining == 0);
                    let rate_limited = hooks.call_is_rate_limited(&result) || header_says_exhausted;

                    if !rate_limited {
                        state.metrics.lock().await.completed_requests += 1;
                        if let Some((from, to)) = state.on_success() {
                            self.events.emit(SchedulerEvent::ConcurrencyIncreased {
                                endpoint: endpoint.to_string(),
                                from,
                                to,
                                reason: ConcurrencyChangeReason::Recovery,
                            });
                        }
                        if let Some(ratio) = quota.as_ref().and_then(|q| q.remaining_ratio()) {
                            if let Some((from, to)) = state.proactive_throttle(ratio) {
                                #[cfg(feature = "tracing")]
                                warn!(
                                    endpoint = %endpoint,
                                    remaining_ratio = ratio,
                                    from,
                                    to,
                                    "proactive throttle engaged"
                                );
                                self.events.emit(SchedulerEvent::RateLimitWarning {
                                    endpoint: endpoint.to_string(),
                                    remaining_ratio: ratio,
                                });
                                self.events.emit(SchedulerEvent::ConcurrencyDecreased {
                                    endpoint: endpoint.to_string(),
                                    from,
                                    to,
                                    reason: ConcurrencyChangeReason::ProactiveThrottle,
                                });
                            }
                        }
                        return Ok(result);
                    }

                    state.metrics.lock().await.rate_limit_hits += 1;
                    #[cfg(feature = "metrics")]
                    counter!("scheduler_ratelimit_hits_total", "endpoint" => endpoint.to_string())
                        .increment(1);
                    if let Some((from, to)) = state.on_rate_limit_hit() {
                        self.events.emit(SchedulerEvent::ConcurrencyDecreased {
                            endpoint: endpoint.to_string(),
                            from,
                            to,
                            reason: ConcurrencyChangeReason::RateLimitHit,
                        });
                    }
                    let retry_after = hooks
                        .call_get_retry_after(&result)
                        .or_else(|| quota.as_ref().and_then(|q| q.retry_after));
                    self.events.emit(SchedulerEvent::RateLimitHit {
                        endpoint: endpoint.to_string(),
                        attempt,
                        retry_after,
                    });

                    if attempt >= max_retries {
                        state.metrics.lock().await.failed_requests += 1;
                        #[cfg(feature = "tracing")]
                        warn!(endpoint = %endpoint, attempts = attempt + 1, "rate limit retries exhausted");
                        return Err(SchedulerError::RateLimitExhausted(None));
                    }
                    self.sleep_before_retry(endpoint, &state, cancel, attempt, retry_after)
                        .await
                        .map_err(|_| SchedulerError::Cancelled)?;
                    attempt += 1;
                }
                Err(error) => {
                    let message = error.to_string();
                    if !hooks::message_indicates_rate_limit(&message) {
                        state.metrics.lock().await.failed_requests += 1;
                        return Err(SchedulerError::Operation(error));
                    }

                    state.metrics.lock().await.rate_limit_hits += 1;
                    #[cfg(feature = "metrics")]
                    counter!("scheduler_ratelimit_hits_total", "endpoint" => endpoint.to_string())
                        .increment(1);
                    if let Some((from, to)) = state.on_rate_limit_hit() {
                        self.events.emit(SchedulerEvent::ConcurrencyDecreased {
                            endpoint: endpoint.to_string(),
                            from,
                            to,
                            reason: ConcurrencyChangeReason::RateLimitHit,
                        });
                    }
                    self.events.emit(SchedulerEvent::RateLimitHit {
                        endpoint: endpoint.to_string(),
                        attempt,
                        retry_after: None,
                    });

                    if attempt >= max_retries {
                        state.metrics.lock().await.failed_requests += 1;
                        return Err(SchedulerError::RateLimitExhausted(Some(error)));
                    }
                    self.sleep_before_retry(endpoint, &state, cancel, attempt, None)
                        .await
                        .map_err(|_| SchedulerError::Cancelled)?;
                    attempt += 1;
                }
            }
        }
    }

    async fn apply_quota(
        &self,
        endpoint: &str,
        state: &Arc<EndpointState>,
        quota: Option<&headers::ParsedQuota>,
    ) {
        let Some(quota) = quota else {
            return;
        };
        if let Some(reset_at) = quota.reset_at {
            if let Ok(delta) = reset_at.duration_since(SystemTime::now()) {
                state.set_reset_at(Instant::now() + delta).await;
            }
        }
        if (quota.limit_requests.is_some() || quota.limit_tokens.is_some())
            && state.mark_limits_learned()
        {
            self.events.emit(SchedulerEvent::RateLimitLearned {
                endpoint: endpoint.to_string(),
                limit_requests: quota.limit_requests,
                limit_tokens: quota.limit_tokens,
            });
        }
    }

    async fn sleep_before_retry(
        &self,
        endpoint: &str,
        state: &Arc<EndpointState>,
        cancel: &CancellationToken,
        attempt: u32,
        retry_after_floor: Option<std::time::Duration>,
    ) -> Result<(), error::Cancelled> {
        state.metrics.lock().await.retried_requests += 1;
        #[cfg(feature = "metrics")]
        counter!("scheduler_retries_total", "endpoint" => endpoint.to_string()).increment(1);
        let computed = backoff::compute_delay(
            self.config.base_delay,
            self.config.max_delay,
            self.config.jitter_factor,
            attempt,
        );
        let delay = retry_after_floor.map_or(computed, |floor| computed.max(floor));
        #[cfg(feature = "tracing")]
        debug!(endpoint = %endpoint, attempt, delay_ms = delay.as_millis(), "retrying after delay");
        self.events.emit(SchedulerEvent::RequestRetrying {
            endpoint: endpoint.to_string(),
            attempt,
            delay,
        });
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancel.cancelled() => Err(error::Cancelled),
        }
    }
}
