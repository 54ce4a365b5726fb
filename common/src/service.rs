//! The contract between the HTTP gateway and the export machinery.

use async_trait::async_trait;

use crate::error::ExportError;
use crate::values::{ExportArtifact, ExportJob, HealthSnapshot};

/// Trait the gateway dispatches against.
///
/// The server binary implements this over the real pool + pipeline; gateway
/// tests implement it with a stub so no browser is needed.
#[async_trait]
pub trait ExportService: Send + Sync + 'static {
    /// Run one export job to completion (or failure).
    async fn export(&self, job: ExportJob) -> Result<ExportArtifact, ExportError>;

    /// Observability snapshot for the health route.
    async fn health(&self) -> HealthSnapshot;

    /// Switch the active library version; returns the now-active version.
    async fn switch_version(&self, version: &str) -> Result<String, ExportError>;
}

// Allows Arc<dyn ExportService> to be used wherever an ExportService is
// expected (axum state is a concrete Clone type).
#[async_trait]
impl ExportService for std::sync::Arc<dyn ExportService> {
    async fn export(&self, job: ExportJob) -> Result<ExportArtifact, ExportError> {
        (**self).export(job).await
    }

    async fn health(&self) -> HealthSnapshot {
        (**self).health().await
    }

    async fn switch_version(&self, version: &str) -> Result<String, ExportError> {
        (**self).switch_version(version).await
    }
}
