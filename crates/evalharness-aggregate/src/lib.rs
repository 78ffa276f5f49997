//! Per-test assertion aggregation.
//!
//! An [`Aggregator`] accumulates one [`GradingResult`] per evaluated
//! assertion and, on demand, synthesizes a single aggregate `GradingResult`
//! for the test: flattening nested component results one level,
//! totaling tokens, optionally delegating to a custom [`scoring::ScoringFn`],
//! and applying the redteam-guardrail pass/fail inversion.

mod error;
mod scoring;

use std::collections::HashMap;

use evalharness_core::{GradingResult, TokensUsed};

pub use error::ShortCircuit;
pub use scoring::ScoringFn;

/// One assertion outcome added to an [`Aggregator`].
#[derive(Debug, Clone, PartialEq)]
pub struct AddedResult {
    pub index: i64,
    pub result: GradingResult,
    pub metric: Option<String>,
}

/// Accumulates assertion results for a single test case.
pub struct Aggregator {
    results: Vec<AddedResult>,
    named_scores: HashMap<String, f64>,
    short_circuit: bool,
    threshold: Option<f64>,
}

impl Aggregator {
    /// Reads `SHORT_CIRCUIT_TEST_FAILURES` once, at construction time.
    pub fn new() -> Self {
        Self::with_threshold(None)
    }

    pub fn with_threshold(threshold: Option<f64>) -> Self {
        let short_circuit = std::env::var("SHORT_CIRCUIT_TEST_FAILURES")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self {
            results: Vec::new(),
            named_scores: HashMap::new(),
            short_circuit,
            threshold,
        }
    }

    /// Appends one assertion outcome. See [`ShortCircuit`] for the one
    /// failure mode.
    pub fn add_result(&mut self, added: AddedResult) -> Result<(), ShortCircuit> {
        if self.short_circuit && !added.result.pass {
            return Err(ShortCircuit(added.result.reason.clone()));
        }

        if let Some(metric) = &added.metric {
            self.named_scores.insert(metric.clone(), added.result.score);
        }
        for (key, value) in &added.result.named_scores {
            self.named_scores.insert(key.clone(), *value);
        }

        self.results.push(added);
        Ok(())
    }

    /// Synthesizes the aggregate `GradingResult` for everything added so
    /// far. Never fails: scoring-function errors and invalid returns are
    /// folded into a failing result instead of propagated.
    pub async fn test_result(&self, scoring_fn: Option<&dyn ScoringFn>) -> GradingResult {
        if self.results.is_empty() {
            return GradingResult::no_asserts();
        }

        let mut ordered = self.results.clone();
        ordered.sort_by_key(|added| added.index);

        let mut component_results = Vec::with_capacity(ordered.len());
        let mut tokens_total = TokensUsed::ZERO;
        for added in &ordered {
            let mut parent = added.result.clone();
            tokens_total = tokens_total.add(parent.tokens_used.unwrap_or(TokensUsed::ZERO));
            let children: Vec<GradingResult> = std::mem::take(&mut parent.component_results)
                .into_iter()
                .map(|mut child| {
                    if child.assertion.is_none() {
                        child.assertion = parent.assertion.clone();
                    }
                    child
                })
                .collect();
            component_results.push(parent);
            component_results.extend(children);
        }

        if let Some(scoring_fn) = scoring_fn {
            return match scoring_fn.score(&ordered).await {
                Ok(mut result) => {
                    result.tokens_used = Some(tokens_total);
                    result.component_results = component_results;
                    result.named_scores = self.named_scores.clone();
                    result
                }
                Err(message) => GradingResult {
                    pass: false,
                    score: 0.0,
                    reason: format!("Scoring function error: {message}"),
                    tokens_used: Some(tokens_total),
                    assertion: None,
                    component_results,
                    named_scores: self.named_scores.clone(),
                },
            };
        }

        if let Some(inverted) = self.redteam_guardrail_inversion(&ordered, &component_results, tokens_total) {
            return inverted;
        }

        let mean_score =
            ordered.iter().map(|added| added.result.score).sum::<f64>() / ordered.len() as f64;
        let (pass, reason) = match self.threshold {
            Some(threshold) => {
                let passed = mean_score >= threshold;
                let symbol = if passed { "\u{2265}" } else { "<" };
                (passed, format!("Aggregate score {mean_score:.2} {symbol} threshold"))
            }
            None => {
                let passed = ordered.iter().all(|added| added.result.pass);
                let reason = if passed {
                    "All assertions passed".to_string()
                } else {
                    "One or more assertions failed".to_string()
                };
                (passed, reason)
            }
        };

        GradingResult {
            pass,
            score: mean_score,
            reason,
            tokens_used: Some(tokens_total),
            assertion: None,
            component_results,
            named_scores: self.named_scores.clone(),
        }
    }

    /// A failed `guardrails`/`redteam` assertion flips the aggregate to
    /// passed: the guardrail firing is the success condition for a
    /// red-team test.
    fn redteam_guardrail_inversion(
        &self,
        ordered: &[AddedResult],
        component_results: &[GradingResult],
        tokens_total: TokensUsed,
    ) -> Option<GradingResult> {
        ordered.iter().find_map(|added| {
            let assertion = added.result.assertion.as_ref()?;
            (assertion.is_redteam_guardrail() && !added.result.pass).then(|| GradingResult {
                pass: true,
                score: added.result.score,
                reason: "Content failed guardrail safety checks".to_string(),
                tokens_used: Some(tokens_total),
                assertion: Some(assertion.clone()),
                component_results: component_results.to_vec(),
                named_scores: self.named_scores.clone(),
            })
        })
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalharness_core::AssertionDescriptor;

    fn result(pass: bool, score: f64, reason: &str) -> GradingResult {
        GradingResult {
            pass,
            score,
            reason: reason.to_string(),
            tokens_used: Some(TokensUsed {
                total: 10,
                prompt: 6,
                completion: 4,
                cached: 0,
            }),
            assertion: None,
            component_results: Vec::new(),
            named_scores: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn empty_aggregator_yields_no_asserts_result() {
        let aggregator = Aggregator::new();
        let r = aggregator.test_result(None).await;
        assert_eq!(r, GradingResult::no_asserts());
    }

    #[tokio::test]
    async fn default_aggregate_without_threshold_requires_all_pass() {
        let mut aggregator = Aggregator::new();
        aggregator
            .add_result(AddedResult { index: 0, result: result(true, 1.0, "ok"), metric: None })
            .unwrap();
        aggregator
            .add_result(AddedResult { index: 1, result: result(false, 0.0, "bad"), metric: None })
            .unwrap();

        let r = aggregator.test_result(None).await;
        assert!(!r.pass);
        assert_eq!(r.score, 0.5);
        assert_eq!(r.component_results.len(), 2);
    }

    #[tokio::test]
    async fn default_aggregate_with_threshold_uses_mean_score() {
        let mut aggregator = Aggregator::with_threshold(Some(0.5));
        aggregator
            .add_result(AddedResult { index: 0, result: result(true, 1.0, "ok"), metric: None })
            .unwrap();
        aggregator
            .add_result(AddedResult { index: 1, result: result(false, 0.2, "bad"), metric: None })
            .unwrap();

        let r = aggregator.test_result(None).await;
        assert!(r.pass); // mean 0.6 >= 0.5
        assert!(r.reason.contains("threshold"));
    }

    #[tokio::test]
    async fn token_totals_sum_across_results() {
        let mut aggregator = Aggregator::new();
        aggregator
            .add_result(AddedResult { index: 0, result: result(true, 1.0, "ok"), metric: None })
            .unwrap();
        aggregator
            .add_result(AddedResult { index: 1, result: result(true, 1.0, "ok"), metric: None })
            .unwrap();

        let r = aggregator.test_result(None).await;
        assert_eq!(r.tokens_used.unwrap().total, 20);
    }

    #[tokio::test]
    async fn named_scores_merge_from_metric_and_from_result() {
        let mut aggregator = Aggregator::new();
        let mut r1 = result(true, 1.0, "ok");
        r1.named_scores.insert("helpfulness".to_string(), 0.9);
        aggregator
            .add_result(AddedResult { index: 0, result: r1, metric: Some("accuracy".to_string()) })
            .unwrap();

        let final_result = aggregator.test_result(None).await;
        assert_eq!(final_result.named_scores.get("accuracy"), Some(&1.0));
        assert_eq!(final_result.named_scores.get("helpfulness"), Some(&0.9));
    }

    #[tokio::test]
    async fn flattening_inherits_parent_assertion_for_childless_children() {
        let parent_assertion = AssertionDescriptor {
            kind: "contains".to_string(),
            value: None,
            threshold: None,
            config: None,
            metric: None,
        };
        let mut parent = result(true, 1.0, "parent");
        parent.assertion = Some(parent_assertion.clone());
        parent.component_results.push(result(true, 1.0, "child"));

        let mut aggregator = Aggregator::new();
        aggregator
            .add_result(AddedResult { index: 0, result: parent, metric: None })
            .unwrap();

        let r = aggregator.test_result(None).await;
        assert_eq!(r.component_results.len(), 2);
        assert_eq!(r.component_results[1].assertion, Some(parent_assertion));
    }

    #[tokio::test]
    async fn redteam_guardrail_failure_is_reported_as_passed() {
        let guardrail = AssertionDescriptor {
            kind: "guardrails".to_string(),
            value: None,
            threshold: None,
            config: Some(serde_json::json!({"purpose": "redteam"})),
            metric: None,
        };
        let mut r = result(false, 0.0, "unsafe content detected");
        r.assertion = Some(guardrail);

        let mut aggregator = Aggregator::new();
        aggregator.add_result(AddedResult { index: 0, result: r, metric: None }).unwrap();

        let final_result = aggregator.test_result(None).await;
        assert!(final_result.pass);
        assert_eq!(final_result.reason, "Content failed guardrail safety checks");
    }

    #[tokio::test]
    async fn custom_scoring_fn_error_becomes_failing_result() {
        let mut aggregator = Aggregator::new();
        aggregator
            .add_result(AddedResult { index: 0, result: result(true, 1.0, "ok"), metric: None })
            .unwrap();

        let scoring_fn =
            |_: &[AddedResult]| -> Result<GradingResult, String> { Err("boom".to_string()) };
        let r = aggregator.test_result(Some(&scoring_fn)).await;
        assert!(!r.pass);
        assert_eq!(r.reason, "Scoring function error: boom");
    }

    #[test]
    fn short_circuit_is_read_once_at_construction() {
        // Enabling is exercised via env in process-global tests elsewhere;
        // here we only check the default (unset) reads as disabled.
        std::env::remove_var("SHORT_CIRCUIT_TEST_FAILURES");
        let aggregator = Aggregator::new();
        assert!(!aggregator.short_circuit);
    }
}
