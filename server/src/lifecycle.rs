//! Process-wide init order and graceful shutdown.
//!
//! Startup: cache first (fatal on failure), then the engine with bounded
//! retries, then the pool warm-up and its background tasks. Shutdown is the
//! reverse: drain the pool, then close the engine.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use common::Config;
use hcexport_cache::AssetCache;
use hcexport_pipeline::Exporter;
use hcexport_pool::WorkerPool;
use hcexport_renderer::{ChromeEngine, PageFactory, RenderEngine};

/// Engine launch retry policy.
const LAUNCH_MAX_ATTEMPTS: u32 = 25;
const LAUNCH_RETRY_SLEEP: Duration = Duration::from_secs(4);

pub struct Runtime {
    pub exporter: Arc<Exporter>,
    pool: WorkerPool<PageFactory>,
    engine: Arc<dyn RenderEngine>,
}

/// Bring every subsystem up in order. An error here means the process must
/// not start serving.
pub async fn init(config: &Config) -> Result<Runtime> {
    let cache = Arc::new(AssetCache::new(config.highcharts.clone()));
    cache
        .ensure()
        .await
        .context("failed to prepare the chart library cache")?;
    info!(version = %cache.version().await, "chart library ready");

    let engine = launch_engine(config).await?;

    let factory = Arc::new(PageFactory::new(
        engine.clone(),
        cache.clone(),
        config.pool.work_limit,
        config.debug.listen_to_console,
    ));
    let pool = WorkerPool::new(factory.clone(), config.pool.clone());
    pool.start().await;
    info!(
        min = config.pool.min_workers,
        max = config.pool.max_workers,
        "worker pool started"
    );

    let exporter = Arc::new(Exporter::new(pool.clone(), factory, cache, config));
    Ok(Runtime {
        exporter,
        pool,
        engine,
    })
}

async fn launch_engine(config: &Config) -> Result<Arc<dyn RenderEngine>> {
    for attempt in 1..=LAUNCH_MAX_ATTEMPTS {
        match ChromeEngine::launch(&config.debug, &config.other).await {
            Ok(engine) => {
                info!(attempt, "browser engine launched");
                return Ok(Arc::new(engine));
            }
            Err(err) => {
                warn!(attempt, %err, "browser launch failed");
                if attempt < LAUNCH_MAX_ATTEMPTS {
                    tokio::time::sleep(LAUNCH_RETRY_SLEEP).await;
                }
            }
        }
    }
    bail!("browser engine did not come up after {LAUNCH_MAX_ATTEMPTS} attempts");
}

/// Drain the pool, then close the engine. Safe to call once at exit.
pub async fn shutdown(runtime: &Runtime) {
    runtime.pool.drain().await;
    if let Err(err) = runtime.engine.close().await {
        warn!(%err, "browser engine close failed");
    }
    info!("shutdown complete");
}
