//! Per-endpoint scheduling state: the admission-control slot machinery,
//! the adaptive concurrency cap, and the rolling metrics the cap decisions
//! and observability both read from.
//!
//! The FIFO waiter queue is grounded in
//! `other_examples/096ef147_jscraik-Cortex-OS__apps-cortex-code-backup-src-github-rate_limiter.rs.rs`'s
//! `VecDeque<QueuedRequest>`; the atomic cap and compare-exchange retry loop
//! follow `tower-resilience-core::aimd::AimdController`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as BlockingMutex};
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::Cancelled;

/// Consecutive successes required before the cap is nudged back up.
const RECOVERY_THRESHOLD: usize = 5;
/// Remaining-ratio floor below which proactive throttling engages.
const PROACTIVE_THRESHOLD: f64 = 0.10;
/// Samples kept for latency percentile estimates.
const LATENCY_WINDOW: usize = 256;

struct Waiter {
    tx: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
pub struct EndpointMetrics {
    pub total_requests: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub rate_limit_hits: u64,
    pub retried_requests: u64,
    latencies: VecDeque<Duration>,
}

impl EndpointMetrics {
    pub fn record_latency(&mut self, latency: Duration) {
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    /// Nearest-rank percentile, `p` in `[0.0, 1.0]`. `None` if no samples
    /// have been recorded yet.
    pub fn latency_percentile(&self, p: f64) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let mut sorted: Vec<Duration> = self.latencies.iter().copied().collect();
        sorted.sort_unstable();
        let rank = ((p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64).round()) as usize;
        sorted.get(rank).copied()
    }
}

/// RAII admission slot: releasing happens automatically on drop, so an
/// operation that returns early, panics-and-unwinds, or is cancelled still
/// frees its slot.
pub struct Permit {
    state: Arc<EndpointState>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.state.release();
    }
}

pub struct EndpointState {
    pub key: String,
    min_concurrency: usize,
    initial_concurrency: usize,
    max_concurrency: AtomicUsize,
    active_requests: AtomicUsize,
    consecutive_successes: AtomicUsize,
    reset_at: Mutex<Option<Instant>>,
    /// A plain blocking mutex, not `tokio::sync::Mutex`: `Permit::drop`
    /// calls `release()` synchronously, and a `Drop` impl cannot `.await`.
    /// The critical section here is a handful of non-blocking `VecDeque`
    /// operations, never held across an `.await`.
    waiters: BlockingMutex<VecDeque<Waiter>>,
    learned_limits: AtomicBool,
    pub metrics: Mutex<EndpointMetrics>,
    rate_limit_hit_count: AtomicU64,
}

impl EndpointState {
    pub fn new(key: String, min_concurrency: usize, initial_concurrency: usize) -> Arc<Self> {
        Arc::new(Self {
            key,
            min_concurrency,
            initial_concurrency,
            max_concurrency: AtomicUsize::new(initial_concurrency),
            active_requests: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
            reset_at: Mutex::new(None),
            waiters: BlockingMutex::new(VecDeque::new()),
            learned_limits: AtomicBool::new(false),
            metrics: Mutex::new(EndpointMetrics::default()),
            rate_limit_hit_count: AtomicU64::new(0),
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.load(Ordering::SeqCst)
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::SeqCst)
    }

    pub async fn set_reset_at(&self, at: Instant) {
        *self.reset_at.lock().await = Some(at);
    }

    /// `true` the first time limits are learned for this endpoint.
    pub fn mark_limits_learned(&self) -> bool {
        self.learned_limits
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    async fn wait_for_reset(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let deadline = { *self.reset_at.lock().await };
        let Some(deadline) = deadline else {
            return Ok(());
        };
        if deadline <= Instant::now() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline.into()) => Ok(()),
            _ = cancel.cancelled() => Err(Cancelled),
        }
    }

    fn try_acquire_immediate(self: &Arc<Self>) -> Option<Permit> {
        loop {
            let current = self.active_requests.load(Ordering::SeqCst);
            let max = self.max_concurrency.load(Ordering::SeqCst);
            if current >= max {
                return None;
            }
            if self
                .active_requests
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(Permit {
                    state: Arc::clone(self),
                });
            }
        }
    }

    async fn wait_in_queue(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<Permit, Cancelled> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().push_back(Waiter { tx });

        tokio::select! {
            result = rx => {
                result.map_err(|_| Cancelled)?;
                Ok(Permit { state: Arc::clone(self) })
            }
            _ = cancel.cancelled() => Err(Cancelled),
        }
    }

    /// Acquires one admission slot, waiting out any active reset window and
    /// then either taking a free slot or queuing FIFO behind other waiters.
    pub async fn acquire_slot(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<Permit, Cancelled> {
        self.wait_for_reset(cancel).await?;
        if let Some(permit) = self.try_acquire_immediate() {
            return Ok(permit);
        }
        self.wait_in_queue(cancel).await
    }

    /// Releases a slot, handing it directly to the next FIFO waiter if one
    /// is present rather than letting every waiter race to reacquire.
    fn release(&self) {
        let mut waiters = self.waiters.lock().unwrap();
        while let Some(waiter) = waiters.pop_front() {
            if waiter.tx.send(()).is_ok() {
                return;
            }
            // Receiver already dropped (that waiter was cancelled); try the
            // next one in line instead of leaking the slot.
        }
        drop(waiters);
        self.active_requests.fetch_sub(1, Ordering::SeqCst);
    }

    /// Halves the cap (floored at `min_concurrency`) and resets the
    /// recovery counter. Returns the `(from, to)` pair iff the cap changed.
    pub fn on_rate_limit_hit(&self) -> Option<(usize, usize)> {
        self.consecutive_successes.store(0, Ordering::SeqCst);
        self.rate_limit_hit_count.fetch_add(1, Ordering::SeqCst);
        loop {
            let current = self.max_concurrency.load(Ordering::SeqCst);
            let proposed = (current / 2).max(self.min_concurrency);
            if proposed == current {
                return None;
            }
            if self
                .max_concurrency
                .compare_exchange(current, proposed, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some((current, proposed));
            }
        }
    }

    /// Counts a success toward the recovery threshold; every fifth
    /// consecutive success nudges the cap up toward `initial_concurrency`.
    pub fn on_success(&self) -> Option<(usize, usize)> {
        let count = self.consecutive_successes.fetch_add(1, Ordering::SeqCst) + 1;
        if count < RECOVERY_THRESHOLD {
            return None;
        }
        self.consecutive_successes.store(0, Ordering::SeqCst);
        loop {
            let current = self.max_concurrency.load(Ordering::SeqCst);
            let proposed = ((current as f64 * 1.5).ceil() as usize).min(self.initial_concurrency);
            if proposed <= current {
                return None;
            }
            if self
                .max_concurrency
                .compare_exchange(current, proposed, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some((current, proposed));
            }
        }
    }

    /// Below the 10% remaining-ratio threshold, shrinks the cap ahead of an
    /// actual rate-limit hit. The shrink factor scales linearly from 0.20
    /// (ratio at or near 0) to 0.60 (ratio at the 10% threshold).
    pub fn proactive_throttle(&self, remaining_ratio: f64) -> Option<(usize, usize)> {
        if remaining_ratio >= PROACTIVE_THRESHOLD {
            return None;
        }
        let clamped = remaining_ratio.clamp(0.0, PROACTIVE_THRESHOLD);
        let factor = 0.20 + (clamped / PROACTIVE_THRESHOLD) * 0.40;
        loop {
            let current = self.max_concurrency.load(Ordering::SeqCst);
            let proposed = ((current as f64 * factor).floor() as usize).max(self.min_concurrency);
            if proposed >= current {
                return None;
            }
            if self
                .max_concurrency
                .compare_exchange(current, proposed, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some((current, proposed));
            }
        }
    }
}
