//! The service implementation the gateway dispatches against.

use std::sync::Arc;

use async_trait::async_trait;

use common::{ExportArtifact, ExportError, ExportJob, ExportService, HealthSnapshot};
use hcexport_pipeline::Exporter;

/// Binds the exporter, pool, and cache behind the gateway's service seam.
pub struct AppState {
    exporter: Arc<Exporter>,
}

impl AppState {
    pub fn new(exporter: Arc<Exporter>) -> Self {
        Self { exporter }
    }
}

#[async_trait]
impl ExportService for AppState {
    async fn export(&self, job: ExportJob) -> Result<ExportArtifact, ExportError> {
        self.exporter.export(job).await
    }

    async fn health(&self) -> HealthSnapshot {
        let pool = self.exporter.pool();
        let stats = pool.stats();
        let (free, in_use, pending_create) = pool.counts().await;

        HealthSnapshot {
            status: "ok".to_string(),
            service: "hc-export-server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            highcharts_version: self.exporter.cache().version().await,
            // Overwritten by the gateway, which owns the start instant.
            uptime_secs: 0,
            pool: stats.snapshot(free, in_use, pending_create),
            success_rate_30m: stats.success_rate(),
        }
    }

    async fn switch_version(&self, version: &str) -> Result<String, ExportError> {
        self.exporter
            .cache()
            .switch_version(version)
            .await
            .map_err(ExportError::from)
    }
}
