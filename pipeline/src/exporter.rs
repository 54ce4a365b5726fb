//! The per-request export sequence: classify, inject, measure, rasterize,
//! clean up. Cleanup runs on success and failure alike.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{info, warn};

use common::{ChartInput, ExportArtifact, ExportError, ExportJob, OutputType};
use hcexport_cache::AssetCache;
use hcexport_pool::WorkerPool;
use hcexport_renderer::{Clip, EnginePage, ImageFormat, PageFactory, PdfOpts, ScreenshotOpts};

use crate::resources::{inject, InjectedResources};

/// Module whose presence enables renderer-side error display.
const DEBUGGER_MODULE: &str = "debugger";

/// Measures the first vector element's box, for vector input.
const VECTOR_MEASURE: &str = "(function () { \
 var el = document.querySelector('#container svg') || document.querySelector('svg'); \
 if (!el) { return { x: 0, y: 0, width: 0, height: 0 }; } \
 var r = el.getBoundingClientRect(); \
 return { x: r.x, y: r.y, width: r.width, height: r.height }; })()";

/// Reports the container's box, for the screenshot clip origin.
const CONTAINER_RECT: &str = "(function () { \
 var el = document.getElementById('container'); \
 if (!el) { return { x: 0, y: 0, width: 0, height: 0 }; } \
 var r = el.getBoundingClientRect(); \
 return { x: r.x, y: r.y, width: r.width, height: r.height }; })()";

/// Viewport resolved by the measure step.
#[derive(Debug, Clone, Copy)]
struct Measured {
    clip_x: f64,
    clip_y: f64,
    width: f64,
    height: f64,
    device_scale: f64,
}

/// Runs jobs over the worker pool. One instance per process.
pub struct Exporter {
    pool: WorkerPool<PageFactory>,
    factory: Arc<PageFactory>,
    cache: Arc<AssetCache>,
    rasterization_timeout: Duration,
    allow_file_resources: bool,
    hard_reset_page: bool,
    benchmarking: bool,
}

impl Exporter {
    pub fn new(
        pool: WorkerPool<PageFactory>,
        factory: Arc<PageFactory>,
        cache: Arc<AssetCache>,
        config: &common::Config,
    ) -> Self {
        Self {
            pool,
            factory,
            cache,
            rasterization_timeout: Duration::from_millis(config.export.rasterization_timeout),
            allow_file_resources: config.custom_logic.allow_file_resources,
            hard_reset_page: config.other.hard_reset_page,
            benchmarking: config.pool.benchmarking,
        }
    }

    pub fn pool(&self) -> &WorkerPool<PageFactory> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<AssetCache> {
        &self.cache
    }

    /// Run one job. Exactly one of success, failure, or cancellation is
    /// reflected in the counters; a cancelled job still cleans up its
    /// borrowed worker but changes neither success nor failure counts.
    pub async fn export(&self, job: ExportJob) -> Result<ExportArtifact, ExportError> {
        let started = Instant::now();
        let stats = self.pool.stats();

        stats.record_attempt();
        if job.input.is_vector() {
            stats.record_svg_attempt();
        }

        // Vector in, vector out: the input is returned unchanged, no
        // worker involved.
        if let (ChartInput::Vector(markup), OutputType::Svg) = (&job.input, job.out_type) {
            if job.cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }
            let artifact = ExportArtifact::Text(markup.clone());
            stats.record_success(started.elapsed().as_millis() as u64);
            return Ok(artifact);
        }

        let mut resource = match self.pool.acquire().await {
            Ok(resource) => resource,
            Err(err) => {
                if job.cancel.is_cancelled() {
                    return Err(ExportError::Cancelled);
                }
                stats.record_failure();
                return Err(err.into());
            }
        };

        let result = self.run_on_page(&job, resource.payload().as_ref()).await;

        if result
            .as_ref()
            .err()
            .is_some_and(|err| err.retires_worker())
        {
            // The page may be mid-render; never reuse it.
            resource.force_retirement(self.pool.config().work_limit);
        }
        self.pool.release(resource).await;

        if job.cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        let elapsed = started.elapsed().as_millis() as u64;
        match &result {
            Ok(artifact) => {
                stats.record_success(elapsed);
                if self.benchmarking {
                    info!(
                        request_id = %job.request_id,
                        elapsed_ms = elapsed,
                        bytes = artifact.len(),
                        "export finished"
                    );
                }
            }
            Err(err) => {
                stats.record_failure();
                warn!(request_id = %job.request_id, %err, "export failed");
            }
        }
        result
    }

    /// The pipeline proper. Cleanup runs regardless of the outcome.
    async fn run_on_page(
        &self,
        job: &ExportJob,
        page: &dyn EnginePage,
    ) -> Result<ExportArtifact, ExportError> {
        let mut injected = InjectedResources::default();
        let result = self.render_steps(job, page, &mut injected).await;
        self.cleanup(page, injected).await;
        result
    }

    async fn render_steps(
        &self,
        job: &ExportJob,
        page: &dyn EnginePage,
        injected: &mut InjectedResources,
    ) -> Result<ExportArtifact, ExportError> {
        // 1. Load the input into the page.
        let is_vector = job.input.is_vector();
        match &job.input {
            ChartInput::Vector(markup) => {
                page.set_content(&vector_document(markup)).await?;
            }
            ChartInput::Config(value) => {
                let mut config = value.clone();
                prefill_dimensions(&mut config, job.height, job.width);
                self.create_chart(job, page, &config.to_string()).await?;
            }
            ChartInput::Injection(raw) => {
                // Size through CSS; the configuration source itself is
                // evaluated verbatim in the page.
                let id = format!("hc-inject-size-{}", job.request_id);
                let css = format!(
                    "#container {{ height: {}px; width: {}px; }}",
                    job.height, job.width
                );
                page.add_style(&css, &id).await.map_err(ExportError::from)?;
                injected.track(id);
                self.create_chart(job, page, &format!("({raw})")).await?;
            }
        }

        // 2. Per-request resources.
        if let Some(resources) = &job.resources {
            let handles = inject(page, resources, self.allow_file_resources, &job.request_id).await?;
            injected.absorb(handles);
        }

        // 3. Resolve the viewport.
        let measured = self.measure(job, page, is_vector).await?;

        // 4. Rasterize, raced against the timeout.
        match tokio::time::timeout(
            self.rasterization_timeout,
            self.rasterize(job, page, measured),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExportError::RasterizationTimeout),
        }
    }

    /// Drive the render hook with a structured or raw configuration.
    async fn create_chart(
        &self,
        job: &ExportJob,
        page: &dyn EnginePage,
        config_expr: &str,
    ) -> Result<(), ExportError> {
        let display_errors = job.display_errors && self.cache.has_module(DEBUGGER_MODULE).await;
        let opts = json!({
            "constr": job.constr,
            "globalOptions": job.global_options,
            "themeOptions": job.theme_options,
            "customCode": job.custom_code,
            "callback": job.callback,
        });
        let expression = format!(
            "window.__chartRenderer.render({config_expr}, {opts}, {display_errors})"
        );
        let outcome = page.evaluate(&expression).await?;
        if !outcome.is_object() {
            return Err(ExportError::Render(
                "chart creation reported no dimensions".to_string(),
            ));
        }
        Ok(())
    }

    async fn measure(
        &self,
        job: &ExportJob,
        page: &dyn EnginePage,
        is_vector: bool,
    ) -> Result<Measured, ExportError> {
        let (mut measured_h, measured_w) = if is_vector {
            let rect = page.evaluate(VECTOR_MEASURE).await?;
            let height = field(&rect, "height") * job.scale;
            let width = field(&rect, "width") * job.scale;
            // Vector rasterization zooms the document instead of the
            // device: scale is baked into the layout here.
            page.evaluate(&format!(
                "document.body.style.zoom = {}; document.body.style.margin = '0px';",
                job.scale
            ))
            .await?;
            (height, width)
        } else {
            let dims = page.evaluate("window.__chartRenderer.dimensions()").await?;
            (field(&dims, "height"), field(&dims, "width"))
        };

        // A collapsed layout reports 0 or 1; never emit a sliver.
        if measured_h <= 1.0 {
            measured_h = 500.0;
        }

        let rect = page.evaluate(CONTAINER_RECT).await?;
        Ok(Measured {
            clip_x: field(&rect, "x"),
            clip_y: field(&rect, "y"),
            height: measured_h.max(job.height).ceil(),
            width: measured_w.max(job.width).ceil(),
            device_scale: if is_vector { 1.0 } else { job.scale },
        })
    }

    async fn rasterize(
        &self,
        job: &ExportJob,
        page: &dyn EnginePage,
        measured: Measured,
    ) -> Result<ExportArtifact, ExportError> {
        let clip = Clip {
            x: measured.clip_x,
            y: measured.clip_y,
            width: measured.width,
            height: measured.height,
            scale: measured.device_scale,
        };
        match job.out_type {
            OutputType::Svg => {
                let markup = page.outer_html("#container svg").await?;
                if markup.is_empty() {
                    return Err(ExportError::Render(
                        "no vector element found in the container".to_string(),
                    ));
                }
                Ok(ExportArtifact::Text(markup))
            }
            OutputType::Png => {
                let bytes = page
                    .screenshot(ScreenshotOpts {
                        format: ImageFormat::Png,
                        quality: None,
                        clip,
                        omit_background: true,
                        capture_beyond_viewport: false,
                    })
                    .await?;
                Ok(ExportArtifact::Binary(bytes))
            }
            OutputType::Jpeg => {
                let bytes = page
                    .screenshot(ScreenshotOpts {
                        format: ImageFormat::Jpeg,
                        quality: Some(80),
                        clip,
                        omit_background: false,
                        capture_beyond_viewport: false,
                    })
                    .await?;
                Ok(ExportArtifact::Binary(bytes))
            }
            OutputType::Pdf => {
                page.set_media("screen").await?;
                // The extra pixel suppresses a trailing blank page.
                let bytes = page
                    .pdf(PdfOpts {
                        width_px: measured.width,
                        height_px: measured.height + 1.0,
                        scale: 1.0,
                    })
                    .await?;
                Ok(ExportArtifact::Binary(bytes))
            }
        }
    }

    /// Dispose injected handles, destroy charts, reset the page. Errors
    /// here are logged only; the page may already be dead.
    async fn cleanup(&self, page: &dyn EnginePage, injected: InjectedResources) {
        injected.dispose(page).await;
        if let Err(err) = page.evaluate("window.__chartRenderer.destroy()").await {
            warn!(%err, "chart destroy failed during cleanup");
        }
        if let Err(err) = self.factory.reset(page, self.hard_reset_page).await {
            warn!(%err, "page reset failed during cleanup");
        }
    }
}

/// Minimal document wrapping vector markup for raster output.
fn vector_document(markup: &str) -> String {
    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">\
         <style>html, body {{ margin: 0; padding: 0; }}</style></head>\
         <body><div id=\"container\">{markup}</div></body></html>"
    )
}

fn prefill_dimensions(config: &mut serde_json::Value, height: f64, width: f64) {
    let Some(obj) = config.as_object_mut() else {
        return;
    };
    let chart = obj
        .entry("chart")
        .or_insert_with(|| serde_json::Value::Object(Default::default()));
    if let Some(chart) = chart.as_object_mut() {
        chart.insert("height".to_string(), json!(height));
        chart.insert("width".to_string(), json!(width));
    }
}

fn field(value: &serde_json::Value, name: &str) -> f64 {
    value.get(name).and_then(|v| v.as_f64()).unwrap_or(0.0)
}
