use common::PoolErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no worker became available within the acquire timeout")]
    AcquireTimeout,

    #[error("worker creation timed out")]
    CreateTimeout,

    #[error("worker destruction timed out")]
    DestroyTimeout,

    #[error("pool is drained")]
    Drained,

    #[error("worker creation failed: {0}")]
    Create(String),
}

impl PoolError {
    pub fn kind(&self) -> PoolErrorKind {
        match self {
            Self::AcquireTimeout => PoolErrorKind::AcquireTimeout,
            Self::CreateTimeout | Self::Create(_) => PoolErrorKind::CreateTimeout,
            Self::DestroyTimeout => PoolErrorKind::DestroyTimeout,
            Self::Drained => PoolErrorKind::Drained,
        }
    }
}

impl From<PoolError> for common::ExportError {
    fn from(err: PoolError) -> Self {
        common::ExportError::Pool {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
