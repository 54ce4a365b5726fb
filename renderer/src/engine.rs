//! Driver traits over the headless engine.
//!
//! The engine is a long-lived external collaborator spoken to over its
//! control protocol. Everything above this module sees only these traits;
//! pages are value-typed handles owned by the pool.

use async_trait::async_trait;

use crate::error::Result;

/// Raster format of a screenshot call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

/// Clip region of a screenshot, in CSS pixels. `scale` is the device scale
/// applied to the capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clip {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub scale: f64,
}

/// Screenshot parameters resolved by the pipeline's measure step.
#[derive(Debug, Clone)]
pub struct ScreenshotOpts {
    pub format: ImageFormat,
    /// JPEG quality; ignored for PNG.
    pub quality: Option<i64>,
    pub clip: Clip,
    /// Transparent background (PNG only).
    pub omit_background: bool,
    /// Engine-tunable hint; not part of the rendering contract.
    pub capture_beyond_viewport: bool,
}

/// PDF parameters. Dimensions are CSS pixels; the driver converts to the
/// engine's paper units.
#[derive(Debug, Clone, Copy)]
pub struct PdfOpts {
    pub width_px: f64,
    pub height_px: f64,
    pub scale: f64,
}

/// One renderer page (browser tab). All operations on a page are serial and
/// issued by whoever currently holds its pool resource.
#[async_trait]
pub trait EnginePage: Send + Sync {
    /// Replace the whole document with the given markup.
    async fn set_content(&self, html: &str) -> Result<()>;

    /// Evaluate an expression in the page, returning its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value>;

    async fn screenshot(&self, opts: ScreenshotOpts) -> Result<Vec<u8>>;

    async fn pdf(&self, opts: PdfOpts) -> Result<Vec<u8>>;

    /// Emulate a media type (`screen` before PDF output).
    async fn set_media(&self, media: &str) -> Result<()>;

    /// Turn the page's HTTP cache off.
    async fn disable_cache(&self) -> Result<()>;

    /// Forward page console messages into the server log.
    async fn attach_console_logging(&self) -> Result<()>;

    /// Cheap liveness probe: false once the page is closed or its main
    /// frame is detached.
    async fn is_alive(&self) -> bool;

    async fn close(&self) -> Result<()>;

    /// Install an inline script element under the given DOM id.
    async fn add_script(&self, source: &str, id: &str) -> Result<()> {
        let script = format!(
            "(function() {{ var s = document.createElement('script'); s.id = {id}; \
             s.textContent = {source}; document.head.appendChild(s); }})()",
            id = js_string(id),
            source = js_string(source),
        );
        self.evaluate(&script).await.map(|_| ())
    }

    /// Install an inline style element under the given DOM id.
    async fn add_style(&self, css: &str, id: &str) -> Result<()> {
        let script = format!(
            "(function() {{ var s = document.createElement('style'); s.id = {id}; \
             s.textContent = {css}; document.head.appendChild(s); }})()",
            id = js_string(id),
            css = js_string(css),
        );
        self.evaluate(&script).await.map(|_| ())
    }

    /// Install a script element loading from a URL under the given DOM id.
    async fn add_script_src(&self, src: &str, id: &str) -> Result<()> {
        let script = format!(
            "(function() {{ var s = document.createElement('script'); s.id = {id}; \
             s.src = {src}; document.head.appendChild(s); }})()",
            id = js_string(id),
            src = js_string(src),
        );
        self.evaluate(&script).await.map(|_| ())
    }

    /// Install a stylesheet link element under the given DOM id.
    async fn add_link(&self, href: &str, id: &str) -> Result<()> {
        let script = format!(
            "(function() {{ var l = document.createElement('link'); l.id = {id}; \
             l.rel = 'stylesheet'; l.href = {href}; document.head.appendChild(l); }})()",
            id = js_string(id),
            href = js_string(href),
        );
        self.evaluate(&script).await.map(|_| ())
    }

    /// Outer markup of the first element matching the selector, or an empty
    /// string when nothing matches.
    async fn outer_html(&self, selector: &str) -> Result<String> {
        let script = format!(
            "(function() {{ var el = document.querySelector({sel}); \
             return el ? el.outerHTML : ''; }})()",
            sel = js_string(selector),
        );
        let value = self.evaluate(&script).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Remove an element previously installed under a DOM id.
    async fn remove_element(&self, id: &str) -> Result<()> {
        let script = format!(
            "(function() {{ var el = document.getElementById({id}); \
             if (el) el.remove(); }})()",
            id = js_string(id),
        );
        self.evaluate(&script).await.map(|_| ())
    }
}

/// The headless engine itself: launch once, hand out pages, close last.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn EnginePage>>;

    /// Whether the engine process is still reachable.
    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// Encode a Rust string as a JS string literal.
pub(crate) fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}
