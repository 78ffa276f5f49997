//! [`crate::Aggregator::add_result`]'s one failure mode.

/// Returned when `SHORT_CIRCUIT_TEST_FAILURES` is enabled and a failing
/// result is added; carries the failing result's `reason`.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("short-circuited on failing assertion: {0}")]
pub struct ShortCircuit(pub String);
