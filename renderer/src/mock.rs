//! In-memory engine for tests: no browser, scriptable failure modes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::engine::{EnginePage, ImageFormat, PdfOpts, RenderEngine, ScreenshotOpts};
use crate::error::{RenderError, Result};

/// Shared, inspectable behavior for every page the mock engine produces.
#[derive(Debug)]
pub struct MockBehavior {
    /// (height, width) the fake chart reports.
    pub dims: Mutex<(f64, f64)>,
    /// Markup returned for vector queries against the container.
    pub svg_outer_html: Mutex<String>,
    /// Whether the render-hook setup probe succeeds.
    pub setup_ok: AtomicBool,
    /// Fail page creation (pool create-retry paths).
    pub fail_new_page: AtomicBool,
    /// Delay injected into screenshot/pdf calls, for timeout tests.
    pub rasterize_delay_ms: AtomicU64,
    /// Total render-hook invocations.
    pub renders: AtomicU64,
    /// Total chart destroys.
    pub destroys: AtomicU64,
    /// DOM ids of injected elements not yet removed, across all pages.
    pub injected_live: Mutex<HashSet<String>>,
    /// Pages created so far.
    pub pages_created: AtomicU64,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            dims: Mutex::new((400.0, 600.0)),
            svg_outer_html: Mutex::new("<svg xmlns=\"http://www.w3.org/2000/svg\"/>".to_string()),
            setup_ok: AtomicBool::new(true),
            fail_new_page: AtomicBool::new(false),
            rasterize_delay_ms: AtomicU64::new(0),
            renders: AtomicU64::new(0),
            destroys: AtomicU64::new(0),
            injected_live: Mutex::new(HashSet::new()),
            pages_created: AtomicU64::new(0),
        }
    }
}

pub struct MockEngine {
    pub behavior: Arc<MockBehavior>,
    connected: AtomicBool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            behavior: Arc::new(MockBehavior::default()),
            connected: AtomicBool::new(true),
        }
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RenderEngine for MockEngine {
    async fn new_page(&self) -> Result<Box<dyn EnginePage>> {
        if self.behavior.fail_new_page.load(Ordering::SeqCst) {
            return Err(RenderError::Launch("mock refuses new pages".into()));
        }
        self.behavior.pages_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockPage {
            behavior: self.behavior.clone(),
            alive: AtomicBool::new(true),
            content: Mutex::new(String::new()),
        }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockPage {
    behavior: Arc<MockBehavior>,
    alive: AtomicBool,
    content: Mutex<String>,
}

impl MockPage {
    /// The markup most recently installed via `set_content`.
    pub fn last_content(&self) -> String {
        self.content.lock().clone()
    }

    fn dims_value(&self) -> serde_json::Value {
        let (height, width) = *self.behavior.dims.lock();
        serde_json::json!({ "x": 0.0, "y": 0.0, "height": height, "width": width })
    }

    async fn rasterize_delay(&self) {
        let delay = self.behavior.rasterize_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
    }
}

#[async_trait]
impl EnginePage for MockPage {
    async fn set_content(&self, html: &str) -> Result<()> {
        // A navigation wipes anything previously injected.
        self.behavior.injected_live.lock().clear();
        *self.content.lock() = html.to_string();
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(RenderError::PageGone);
        }
        if expression.contains("__chartRenderer.setup()") {
            return Ok(serde_json::Value::Bool(
                self.behavior.setup_ok.load(Ordering::SeqCst),
            ));
        }
        if expression.contains("__chartRenderer.render") {
            self.behavior.renders.fetch_add(1, Ordering::SeqCst);
            return Ok(self.dims_value());
        }
        if expression.contains("__chartRenderer.dimensions") {
            return Ok(self.dims_value());
        }
        if expression.contains("__chartRenderer.destroy") {
            self.behavior.destroys.fetch_add(1, Ordering::SeqCst);
            return Ok(serde_json::Value::Null);
        }
        if expression.contains("getBoundingClientRect") {
            return Ok(self.dims_value());
        }
        if expression.trim() == "1 + 1" {
            return Ok(serde_json::json!(2));
        }
        Ok(serde_json::Value::Null)
    }

    async fn screenshot(&self, opts: ScreenshotOpts) -> Result<Vec<u8>> {
        self.rasterize_delay().await;
        let mut bytes = match opts.format {
            ImageFormat::Png => vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
            ImageFormat::Jpeg => vec![0xFF, 0xD8, 0xFF, 0xE0],
        };
        bytes.extend_from_slice(&[0u8; 16]);
        Ok(bytes)
    }

    async fn pdf(&self, _opts: PdfOpts) -> Result<Vec<u8>> {
        self.rasterize_delay().await;
        Ok(b"%PDF-1.4\nmock".to_vec())
    }

    async fn set_media(&self, _media: &str) -> Result<()> {
        Ok(())
    }

    async fn disable_cache(&self) -> Result<()> {
        Ok(())
    }

    async fn attach_console_logging(&self) -> Result<()> {
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn add_script(&self, _source: &str, id: &str) -> Result<()> {
        self.behavior.injected_live.lock().insert(id.to_string());
        Ok(())
    }

    async fn add_script_src(&self, _src: &str, id: &str) -> Result<()> {
        self.behavior.injected_live.lock().insert(id.to_string());
        Ok(())
    }

    async fn add_style(&self, _css: &str, id: &str) -> Result<()> {
        self.behavior.injected_live.lock().insert(id.to_string());
        Ok(())
    }

    async fn add_link(&self, _href: &str, id: &str) -> Result<()> {
        self.behavior.injected_live.lock().insert(id.to_string());
        Ok(())
    }

    async fn outer_html(&self, _selector: &str) -> Result<String> {
        Ok(self.behavior.svg_outer_html.lock().clone())
    }

    async fn remove_element(&self, id: &str) -> Result<()> {
        self.behavior.injected_live.lock().remove(id);
        Ok(())
    }
}
