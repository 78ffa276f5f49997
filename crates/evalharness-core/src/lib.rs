//! Shared data model and event-bus primitive for the evalharness workspace.
//!
//! This crate holds the types that cross component boundaries: the grading
//! result tree produced by assertion plugins and consumed by the aggregator,
//! the declarative test case and the evaluation result row produced by a
//! run, and a small generic event bus used by the scheduler to publish its
//! lifecycle events as a typed, cloneable stream rather than through
//! synchronous listener callbacks.

pub mod events;
pub mod model;

pub use events::EventBus;
pub use model::{
    AssertionDescriptor, EvaluationResult, FailureReason, GradingResult, TestCase, TokensUsed,
};
