use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LanternError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid distance metric '{0}'")]
    InvalidMetric(String),
    #[error("unsupported predicate '{0}'")]
    UnsupportedPredicate(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("index '{0}' does not exist")]
    IndexNotFound(String),
    #[error("backend error: {0}")]
    Backend(#[from] postgres::Error),
    #[error("could not decode column '{column}': {reason}")]
    Decode { column: String, reason: String },
    #[error("timed out after {0:?} waiting for a pooled connection")]
    PoolTimeout(Duration),
    #[error("connection pool is closed")]
    PoolClosed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LanternError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        LanternError::Validation(msg.into())
    }

    pub(crate) fn decode(column: &str, reason: impl Into<String>) -> Self {
        LanternError::Decode {
            column: column.to_string(),
            reason: reason.into(),
        }
    }

    /// Raised before any backend work and never worth retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LanternError::Configuration(_)
                | LanternError::InvalidMetric(_)
                | LanternError::UnsupportedPredicate(_)
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, LanternError::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LanternError::IndexNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, LanternError>;
