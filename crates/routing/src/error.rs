use thiserror::Error;

/// Errors raised while building route tables. Lookup misses are not errors;
/// they surface as `None` or an empty iterator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("invalid hostname pattern '{pattern}': {reason}")]
    InvalidHostname { pattern: String, reason: String },

    #[error("invalid path pattern '{pattern}': {reason}")]
    InvalidPath { pattern: String, reason: String },

    #[error("duplicate binding for key {key}")]
    DuplicateBinding { key: String },

    #[error("no binding matches '{pattern}'")]
    NoMatch { pattern: String },
}

pub type RouteResult<T> = Result<T, RouteError>;

impl RouteError {
    /// Name a duplicate binding by the pattern as it was written rather than
    /// by its internal segment order.
    pub(crate) fn with_pattern(self, pattern: &str) -> Self {
        match self {
            RouteError::DuplicateBinding { .. } => RouteError::DuplicateBinding {
                key: pattern.to_string(),
            },
            other => other,
        }
    }
}
