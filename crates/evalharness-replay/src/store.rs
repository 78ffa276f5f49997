//! The storage collaborator: resolves a prior evaluation by opaque ID or
//! by output file path, consumed by `failing`/`failingOnly`/`errorsOnly`.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use evalharness_core::EvaluationResult;

/// A prior evaluation run: the suite's `defaultTest.vars` (used for the
/// default-var merge fallback) plus every recorded per-test outcome.
#[derive(Debug, Clone, Default)]
pub struct StoredEval {
    pub default_test_vars: HashMap<String, serde_json::Value>,
    pub results: Vec<EvaluationResult>,
}

#[async_trait]
pub trait EvalStore: Send + Sync {
    async fn find_eval_by_id(&self, id: &str) -> Option<StoredEval>;
    async fn read_results_file(&self, path: &Path) -> Option<StoredEval>;
}
