use common::CacheErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("fetch failed for required script {script}: {reason}")]
    RequiredScript { script: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl CacheError {
    /// Failure class used at the service boundary.
    pub fn kind(&self) -> CacheErrorKind {
        match self {
            Self::Network(_) | Self::RequiredScript { .. } => CacheErrorKind::Network,
            Self::Io(_) => CacheErrorKind::Io,
            Self::Parse(_) => CacheErrorKind::Parse,
        }
    }
}

impl From<CacheError> for common::ExportError {
    fn from(err: CacheError) -> Self {
        common::ExportError::Cache {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
