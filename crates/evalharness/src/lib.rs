//! Three components for an eval-style test harness, usable independently
//! or composed as one pipeline: **filter** the declared test list down to
//! what should run, **schedule** each provider call under an adaptive
//! per-endpoint rate limit, then **aggregate** the resulting assertion
//! outcomes into one `GradingResult` per test.
//!
//! # Pipeline
//!
//! ```text
//! declared tests ──▶ FilterSpec::apply ──▶ Scheduler::execute_with_retry ──▶ Aggregator::test_result
//!                        (evalharness-replay)      (evalharness-scheduler)        (evalharness-aggregate)
//! ```
//!
//! None of the three crates depends on the others at the type level —
//! `evalharness_scheduler::Scheduler` is generic over the caller's own
//! result type, `evalharness_aggregate::Aggregator` takes plain
//! `GradingResult`s from whatever produced them, and
//! `evalharness_replay::FilterSpec` only needs a `TestCase` list and a
//! storage collaborator. This crate re-exports all three so a caller that
//! wants the whole pipeline only needs one dependency.
//!
//! # Example
//!
//! ```no_run
//! use evalharness::{aggregate::{Aggregator, AddedResult}, scheduler::{Scheduler, SchedulerConfig, Hooks}};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = Scheduler::new(SchedulerConfig::new());
//! let hooks: Hooks<String> = Hooks::new();
//! let cancel = CancellationToken::new();
//!
//! let response = scheduler
//!     .execute_with_retry("openai", &hooks, &cancel, || async {
//!         Ok::<_, std::io::Error>("provider response".to_string())
//!     })
//!     .await?;
//!
//! let mut aggregator = Aggregator::new();
//! aggregator.add_result(AddedResult {
//!     index: 0,
//!     result: evalharness::core::GradingResult::no_asserts(),
//!     metric: None,
//! })?;
//! let _graded = aggregator.test_result(None).await;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

pub use evalharness_core as core;
pub use evalharness_aggregate as aggregate;
pub use evalharness_replay as replay;
pub use evalharness_scheduler as scheduler;
