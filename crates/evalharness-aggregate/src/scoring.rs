//! The custom-scoring-function collaborator.
//!
//! Unifies sync and async scoring functions behind one trait: a blanket
//! impl adapts any plain `Fn(&[AddedResult]) -> Result<GradingResult,
//! String>` closure, so the common synchronous case needs no wrapper type.

use async_trait::async_trait;
use evalharness_core::GradingResult;

use crate::AddedResult;

#[async_trait]
pub trait ScoringFn: Send + Sync {
    async fn score(&self, components: &[AddedResult]) -> Result<GradingResult, String>;
}

#[async_trait]
impl<F> ScoringFn for F
where
    F: Fn(&[AddedResult]) -> Result<GradingResult, String> + Send + Sync,
{
    async fn score(&self, components: &[AddedResult]) -> Result<GradingResult, String> {
        self(components)
    }
}
