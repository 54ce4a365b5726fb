//! Shared infrastructure for the export server: the configuration model,
//! logging setup, the service seam, and the value types that cross it.

pub mod config;
pub mod error;
pub mod logging;
pub mod service;
pub mod values;

pub use config::Config;
pub use error::{CacheErrorKind, ExportError, PoolErrorKind};
pub use service::ExportService;
pub use values::{
    ChartInput, ExportArtifact, ExportJob, HealthSnapshot, JobResources, OutputType, PoolSnapshot,
};
