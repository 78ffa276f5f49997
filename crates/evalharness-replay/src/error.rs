//! Errors surfaced by [`crate::FilterSpec`] construction and
//! [`crate::FilterSpec::apply`].

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// A malformed filter argument: a `metadata` entry without `=`, an
    /// invalid `firstN`/`sample` value (null, NaN, or non-numeric).
    /// Surfaced eagerly at the builder call where practical.
    #[error("invalid filter: {0}")]
    Validation(String),

    #[error("invalid pattern regex")]
    Pattern(#[from] regex::Error),

    #[error("referenced evaluation could not be found")]
    EvalNotFound,
}
