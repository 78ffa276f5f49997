//! Selects which declared tests to actually run, from a declarative test
//! list and a [`FilterSpec`] built up from a handful of independent filter
//! kinds: `metadata`, `failing`/`failingOnly`/`errorsOnly` against a prior
//! run, a description `pattern`, and `firstN`/`sample` selection.

mod error;
mod matching;
mod store;

use std::collections::HashSet;
use std::path::PathBuf;

use evalharness_core::{FailureReason, TestCase};
use rand::seq::SliceRandom;
use regex::Regex;

pub use error::FilterError;
pub use store::{EvalStore, StoredEval};

/// A reference to a prior evaluation: either its opaque ID (resolved
/// against the storage collaborator) or an output file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalRef {
    Id(String),
    Path(PathBuf),
}

async fn resolve(store: &dyn EvalStore, reference: &EvalRef) -> Result<StoredEval, FilterError> {
    let found = match reference {
        EvalRef::Id(id) => store.find_eval_by_id(id).await,
        EvalRef::Path(path) => store.read_results_file(path).await,
    };
    found.ok_or(FilterError::EvalNotFound)
}

fn coerce_count(value: &serde_json::Value, field: &str) -> Result<i64, FilterError> {
    let as_f64 = match value {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| FilterError::Validation(format!("{field} is not numeric")))?,
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| FilterError::Validation(format!("{field} is not numeric")))?,
        serde_json::Value::Null => {
            return Err(FilterError::Validation(format!("{field} must not be null")))
        }
        _ => return Err(FilterError::Validation(format!("{field} must be numeric"))),
    };
    if as_f64.is_nan() {
        return Err(FilterError::Validation(format!("{field} must not be NaN")));
    }
    Ok(as_f64 as i64)
}

fn metadata_matches(test: &TestCase, key: &str, value: &str) -> bool {
    match test.metadata.get(key) {
        Some(serde_json::Value::Array(items)) => {
            items.iter().any(|item| item.as_str() == Some(value))
        }
        Some(serde_json::Value::String(s)) => s == value,
        Some(_) | None => false,
    }
}

/// A builder-populated filter specification. Validation that can run
/// eagerly (a malformed `metadata` entry, an invalid `pattern` regex, a
/// non-numeric `firstN`/`sample`) happens at the builder call, not at
/// `apply()` time, so a bad filter argument is surfaced before any test
/// runs.
#[derive(Debug, Default)]
pub struct FilterSpec {
    metadata: Vec<(String, String)>,
    failing: Option<EvalRef>,
    failing_only: Option<EvalRef>,
    errors_only: Option<EvalRef>,
    pattern: Option<Regex>,
    first_n: Option<i64>,
    sample: Option<i64>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// `key=value`; an entry without `=` is rejected immediately.
    pub fn metadata_entry(mut self, raw: &str) -> Result<Self, FilterError> {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| FilterError::Validation(format!("metadata entry '{raw}' has no '='")))?;
        self.metadata.push((key.to_string(), value.to_string()));
        Ok(self)
    }

    pub fn failing(mut self, reference: EvalRef) -> Self {
        self.failing = Some(reference);
        self
    }

    pub fn failing_only(mut self, reference: EvalRef) -> Self {
        self.failing_only = Some(reference);
        self
    }

    pub fn errors_only(mut self, reference: EvalRef) -> Self {
        self.errors_only = Some(reference);
        self
    }

    pub fn pattern(mut self, raw: &str) -> Result<Self, FilterError> {
        self.pattern = Some(Regex::new(raw)?);
        Ok(self)
    }

    pub fn first_n(mut self, value: &serde_json::Value) -> Result<Self, FilterError> {
        self.first_n = Some(coerce_count(value, "firstN")?);
        Ok(self)
    }

    pub fn sample(mut self, value: &serde_json::Value) -> Result<Self, FilterError> {
        self.sample = Some(coerce_count(value, "sample")?);
        Ok(self)
    }

    /// Narrows `tests` down to the tests that should actually run, in the
    /// spec's fixed filter order: `metadata` → prior-run filters → `pattern`
    /// → `firstN`/`sample`.
    pub async fn apply(
        &self,
        tests: &[TestCase],
        store: &dyn EvalStore,
    ) -> Result<Vec<TestCase>, FilterError> {
        let mut candidates: Vec<TestCase> = tests.to_vec();

        if !self.metadata.is_empty() {
            candidates.retain(|test| {
                self.metadata
                    .iter()
                    .all(|(key, value)| metadata_matches(test, key, value))
            });
        }

        candidates = self.apply_prior_run_filters(candidates, store).await?;

        if let Some(pattern) = &self.pattern {
            candidates.retain(|test| {
                test.description
                    .as_deref()
                    .is_some_and(|description| pattern.is_match(description))
            });
        }

        if let Some(n) = self.first_n {
            candidates.truncate(n.max(0) as usize);
        }

        if let Some(n) = self.sample {
            let mut rng = rand::rng();
            candidates = candidates
                .choose_multiple(&mut rng, n.max(0) as usize)
                .cloned()
                .collect();
        }

        Ok(candidates)
    }

    async fn apply_prior_run_filters(
        &self,
        candidates: Vec<TestCase>,
        store: &dyn EvalStore,
    ) -> Result<Vec<TestCase>, FilterError> {
        if let Some(reference) = &self.failing {
            let stored = resolve(store, reference).await?;
            return Ok(candidates
                .into_iter()
                .filter(|test| {
                    stored.results.iter().any(|result| {
                        result.failure_reason != FailureReason::None
                            && matching::vars_match(test, &stored.default_test_vars, result)
                    })
                })
                .collect());
        }

        if self.failing_only.is_none() && self.errors_only.is_none() {
            return Ok(candidates);
        }

        let mut matched: HashSet<usize> = HashSet::new();
        if let Some(reference) = &self.failing_only {
            let stored = resolve(store, reference).await?;
            mark_matching_indices(&candidates, &stored, FailureReason::Assert, &mut matched);
        }
        if let Some(reference) = &self.errors_only {
            let stored = resolve(store, reference).await?;
            mark_matching_indices(&candidates, &stored, FailureReason::Error, &mut matched);
        }

        Ok(candidates
            .into_iter()
            .enumerate()
            .filter(|(index, _)| matched.contains(index))
            .map(|(_, test)| test)
            .collect())
    }
}

fn mark_matching_indices(
    candidates: &[TestCase],
    stored: &StoredEval,
    wanted_reason: FailureReason,
    matched: &mut HashSet<usize>,
) {
    for (index, test) in candidates.iter().enumerate() {
        let is_match = stored.results.iter().any(|result| {
            result.failure_reason == wanted_reason
                && matching::vars_match(test, &stored.default_test_vars, result)
        });
        if is_match {
            matched.insert(index);
        }
    }
}
