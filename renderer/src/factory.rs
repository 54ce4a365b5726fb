//! Produces ready-to-render pages for the pool.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use hcexport_cache::AssetCache;
use hcexport_pool::{PoolError, PoolResource, ResourceFactory};

use crate::engine::{EnginePage, RenderEngine};
use crate::error::{RenderError, Result};
use crate::template::{CONTAINER_RESET, PAGE_TEMPLATE, RENDER_PRELUDE, SETUP_EXPRESSION};

/// Builds pages carrying the template, the library blob snapshot, and the
/// render-hook prelude; validates and destroys them on behalf of the pool.
pub struct PageFactory {
    engine: Arc<dyn RenderEngine>,
    cache: Arc<AssetCache>,
    work_limit: u64,
    listen_to_console: bool,
}

impl PageFactory {
    pub fn new(
        engine: Arc<dyn RenderEngine>,
        cache: Arc<AssetCache>,
        work_limit: u64,
        listen_to_console: bool,
    ) -> Self {
        Self {
            engine,
            cache,
            work_limit,
            listen_to_console,
        }
    }

    pub fn engine(&self) -> &Arc<dyn RenderEngine> {
        &self.engine
    }

    /// Install the template, the current library blob, and the prelude into
    /// a blank page. Shared by creation and hard resets.
    async fn install(&self, page: &dyn EnginePage) -> Result<()> {
        page.set_content(PAGE_TEMPLATE).await?;

        let blob = self.cache.blob().await;
        if blob.is_empty() {
            return Err(RenderError::LibraryInit);
        }
        page.evaluate(blob.as_str()).await?;
        page.evaluate(RENDER_PRELUDE).await?;

        let ready = page.evaluate(SETUP_EXPRESSION).await?;
        if ready.as_bool() != Some(true) {
            return Err(RenderError::LibraryInit);
        }
        Ok(())
    }

    /// Return a page to its pristine between-jobs state.
    ///
    /// Soft resets swap the container markup back to the template's; hard
    /// resets reinstall the whole document, blob included.
    pub async fn reset(&self, page: &dyn EnginePage, hard: bool) -> Result<()> {
        if hard {
            self.install(page).await
        } else {
            let script = format!(
                "document.getElementById('container').innerHTML = {}; \
                 document.body.style.zoom = 1;",
                crate::engine::js_string(CONTAINER_RESET)
            );
            page.evaluate(&script).await.map(|_| ())
        }
    }
}

#[async_trait]
impl ResourceFactory for PageFactory {
    type Payload = Box<dyn EnginePage>;

    async fn create(&self) -> hcexport_pool::Result<PoolResource<Self::Payload>> {
        let page = self
            .engine
            .new_page()
            .await
            .map_err(|e| PoolError::Create(e.to_string()))?;

        let prepared: Result<()> = async {
            page.disable_cache().await?;
            self.install(page.as_ref()).await?;
            if self.listen_to_console {
                page.attach_console_logging().await?;
            }
            Ok(())
        }
        .await;

        if let Err(err) = prepared {
            // Never leak a half-built page.
            if let Err(close_err) = page.close().await {
                warn!(%close_err, "failed to close half-built page");
            }
            return Err(PoolError::Create(err.to_string()));
        }

        // Spread rotation times so workers do not all retire at once.
        let initial_work = rand::thread_rng().gen_range(0..=self.work_limit / 2);
        let resource = PoolResource::new(page, initial_work);
        debug!(id = %resource.id(), initial_work, "renderer page created");
        Ok(resource)
    }

    async fn validate(&self, resource: &mut PoolResource<Self::Payload>) -> bool {
        let count = resource.increment_work();
        if count > self.work_limit {
            debug!(id = %resource.id(), count, "page past work limit");
            return false;
        }
        if !self.engine.is_connected() {
            return false;
        }
        resource.payload().is_alive().await
    }

    async fn destroy(&self, resource: PoolResource<Self::Payload>) {
        let id = resource.id();
        let page = resource.into_payload();
        if let Err(err) = page.close().await {
            // Closing failures are logged, never surfaced.
            warn!(%id, %err, "failed to close renderer page");
        } else {
            debug!(%id, "renderer page destroyed");
        }
    }
}
