//! The data model shared by the scheduler, the aggregator, and the replay
//! engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Token accounting for one grading result.
///
/// An absent `tokensUsed` on the JS side contributes zeroes when totals are
/// summed; [`TokensUsed::ZERO`] is that identity element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensUsed {
    pub total: u64,
    pub prompt: u64,
    pub completion: u64,
    pub cached: u64,
}

impl TokensUsed {
    pub const ZERO: TokensUsed = TokensUsed {
        total: 0,
        prompt: 0,
        completion: 0,
        cached: 0,
    };

    /// Component-wise sum, used when the aggregator totals tokens across
    /// every added result.
    pub fn add(self, other: TokensUsed) -> TokensUsed {
        TokensUsed {
            total: self.total + other.total,
            prompt: self.prompt + other.prompt,
            completion: self.completion + other.completion,
            cached: self.cached + other.cached,
        }
    }
}

/// A discriminated assertion kind tag plus its configuration, opaque to the
/// aggregator except for the two carve-outs documented on
/// [`crate`]-adjacent `evalharness-aggregate`: the `threshold`-driven
/// default aggregation, and the `guardrails`/`redteam` inversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionDescriptor {
    /// Discriminated kind tag, e.g. `equals`, `regex`, `javascript`,
    /// `python`, `contains`, `bertscore`, `meteor`, `guardrails`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
}

impl AssertionDescriptor {
    /// `true` for the one special case the aggregator inverts: a guardrail
    /// assertion configured for red-team purposes.
    pub fn is_redteam_guardrail(&self) -> bool {
        self.kind == "guardrails"
            && self
                .config
                .as_ref()
                .and_then(|c| c.get("purpose"))
                .and_then(|p| p.as_str())
                == Some("redteam")
    }
}

/// The atom produced by every assertion evaluation.
///
/// Invariant: if `component_results` is non-empty, the parent's `pass` and
/// `score` must be derivable from them under the aggregator's policy; that
/// invariant is enforced by `evalharness-aggregate::Aggregator::test_result`,
/// not by this type itself, since plugin-produced leaf results legitimately
/// have no children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingResult {
    pub pass: bool,
    pub score: f64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<TokensUsed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion: Option<AssertionDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub component_results: Vec<GradingResult>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub named_scores: HashMap<String, f64>,
}

impl GradingResult {
    /// The canonical "no assertions" result.
    pub fn no_asserts() -> GradingResult {
        GradingResult {
            pass: true,
            score: 1.0,
            reason: "No assertions".to_string(),
            tokens_used: Some(TokensUsed::ZERO),
            assertion: None,
            component_results: Vec::new(),
            named_scores: HashMap::new(),
        }
    }
}

/// `failureReason` on a stored [`EvaluationResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FailureReason {
    None,
    Assert,
    Error,
}

/// One declared test case, read-only after resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub vars: HashMap<String, serde_json::Value>,
    #[serde(default, rename = "assert")]
    pub asserts: Vec<AssertionDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TestCase {
    /// A defensive shallow copy of `vars`, handed to each execution so
    /// runtime augmentations (multi-turn strategies injecting
    /// `_conversation`/`sessionId`) never mutate the declarative source.
    pub fn resolve_vars_for_run(&self) -> HashMap<String, serde_json::Value> {
        self.vars.clone()
    }
}

/// One row per (test × provider × prompt) attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    #[serde(default)]
    pub vars: HashMap<String, serde_json::Value>,
    pub success: bool,
    pub failure_reason: FailureReason,
    pub test_case: TestCase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}
