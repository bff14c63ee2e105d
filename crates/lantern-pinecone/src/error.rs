use lantern_core::LanternError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Lantern(#[from] LanternError),
    #[error("pinecone request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("metric {0} is not supported")]
    UnsupportedMetric(String),
    #[error("index {0} is not ready")]
    IndexNotReady(String),
    #[error("source error: {0}")]
    Source(String),
    #[error("could not start import workers: {0}")]
    Workers(#[from] rayon::ThreadPoolBuildError),
}

pub type ImportResult<T> = std::result::Result<T, ImportError>;
