//! Error classes crossing the gateway/pipeline seam.
//!
//! Subsystems keep their own error enums; at the service boundary everything
//! collapses into [`ExportError`], which the gateway maps onto HTTP statuses.

use thiserror::Error;

/// Asset cache failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheErrorKind {
    Network,
    Io,
    Parse,
}

/// Worker pool failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    AcquireTimeout,
    CreateTimeout,
    DestroyTimeout,
    Drained,
}

#[derive(Debug, Error)]
pub enum ExportError {
    /// Input failed validation or was missing entirely.
    #[error("validation error: {0}")]
    Validation(String),

    /// Asset cache failure (startup-fatal; 500 on the admin route).
    #[error("cache error ({kind:?}): {message}")]
    Cache {
        kind: CacheErrorKind,
        message: String,
    },

    /// Pool-side fault. Acquire timeouts surface as "too busy".
    #[error("pool error ({kind:?}): {message}")]
    Pool {
        kind: PoolErrorKind,
        message: String,
    },

    /// The renderer page raised, or the driver reported failure.
    #[error("rendering failed: {0}")]
    Render(String),

    /// Rasterization exceeded its deadline; the worker is retired.
    #[error("rasterization timed out")]
    RasterizationTimeout,

    /// Client disconnected; no response is written.
    #[error("export cancelled by the client")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExportError {
    /// Whether the fault should retire the worker that served the job.
    pub fn retires_worker(&self) -> bool {
        matches!(self, Self::RasterizationTimeout)
    }
}
