//! chromiumoxide-backed implementation of the driver traits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetEmulatedMediaParams;
use chromiumoxide::cdp::browser_protocol::network::SetCacheDisabledParams;
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, PrintToPdfParams, Viewport};
use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use common::config::{DebugConfig, OtherConfig};

use crate::engine::{EnginePage, ImageFormat, PdfOpts, RenderEngine, ScreenshotOpts};
use crate::error::{RenderError, Result};

/// CSS pixels per inch, the engine's paper unit.
const PX_PER_INCH: f64 = 96.0;

/// Long-lived handle over one browser process.
pub struct ChromeEngine {
    browser: tokio::sync::Mutex<Browser>,
    handler_task: JoinHandle<()>,
    connected: Arc<AtomicBool>,
}

impl ChromeEngine {
    /// Launch the browser with the configured debug knobs. The caller owns
    /// retry policy; one call is one attempt.
    pub async fn launch(debug: &DebugConfig, other: &OtherConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder();

        if !debug.headless || debug.devtools {
            builder = builder.with_head();
        } else if !other.browser_shell_mode {
            // The engine defaults to the headless shell; full new-mode
            // headless is opt-out via config.
            builder = builder.arg("--headless=new");
        }
        if debug.devtools {
            builder = builder.arg("--auto-open-devtools-for-tabs");
            builder = builder.arg(format!("--remote-debugging-port={}", debug.debugging_port));
        }
        builder = builder.args(vec![
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--disable-extensions",
            "--hide-scrollbars",
        ]);

        let config = builder.build().map_err(RenderError::Launch)?;
        let (browser, mut handler) = Browser::launch(config).await?;

        let connected = Arc::new(AtomicBool::new(true));
        let connected_flag = connected.clone();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    warn!(%err, "browser handler error");
                    break;
                }
            }
            connected_flag.store(false, Ordering::SeqCst);
            debug!("browser handler loop ended");
        });

        Ok(Self {
            browser: tokio::sync::Mutex::new(browser),
            handler_task,
            connected,
        })
    }
}

#[async_trait]
impl RenderEngine for ChromeEngine {
    async fn new_page(&self) -> Result<Box<dyn EnginePage>> {
        let page = self.browser.lock().await.new_page("about:blank").await?;
        Ok(Box::new(ChromePage {
            page,
            console_task: parking_lot::Mutex::new(None),
        }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        let result = self.browser.lock().await.close().await;
        self.handler_task.abort();
        self.connected.store(false, Ordering::SeqCst);
        result?;
        Ok(())
    }
}

/// One browser tab.
pub struct ChromePage {
    page: Page,
    console_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl EnginePage for ChromePage {
    async fn set_content(&self, html: &str) -> Result<()> {
        self.page.set_content(html).await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value> {
        let result = self.page.evaluate(expression.to_string()).await?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn screenshot(&self, opts: ScreenshotOpts) -> Result<Vec<u8>> {
        let format = match opts.format {
            ImageFormat::Png => CaptureScreenshotFormat::Png,
            ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        };
        let mut builder = ScreenshotParams::builder()
            .format(format)
            .clip(Viewport {
                x: opts.clip.x,
                y: opts.clip.y,
                width: opts.clip.width,
                height: opts.clip.height,
                scale: opts.clip.scale,
            })
            .omit_background(opts.omit_background)
            .capture_beyond_viewport(opts.capture_beyond_viewport);
        if let Some(quality) = opts.quality {
            builder = builder.quality(quality);
        }
        let bytes = self.page.screenshot(builder.build()).await?;
        Ok(bytes)
    }

    async fn pdf(&self, opts: PdfOpts) -> Result<Vec<u8>> {
        let params = PrintToPdfParams {
            print_background: Some(true),
            scale: Some(opts.scale),
            paper_width: Some(opts.width_px / PX_PER_INCH),
            paper_height: Some(opts.height_px / PX_PER_INCH),
            margin_top: Some(0.0),
            margin_bottom: Some(0.0),
            margin_left: Some(0.0),
            margin_right: Some(0.0),
            prefer_css_page_size: Some(false),
            ..Default::default()
        };
        let bytes = self.page.pdf(params).await?;
        Ok(bytes)
    }

    async fn set_media(&self, media: &str) -> Result<()> {
        self.page
            .execute(SetEmulatedMediaParams {
                media: Some(media.to_string()),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    async fn disable_cache(&self) -> Result<()> {
        self.page
            .execute(SetCacheDisabledParams {
                cache_disabled: true,
            })
            .await?;
        Ok(())
    }

    async fn attach_console_logging(&self) -> Result<()> {
        let mut events = self.page.event_listener::<EventConsoleApiCalled>().await?;
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let text: Vec<String> = event
                    .args
                    .iter()
                    .filter_map(|arg| arg.value.as_ref())
                    .map(|value| value.to_string())
                    .collect();
                debug!(kind = ?event.r#type, "page console: {}", text.join(" "));
            }
        });
        if let Some(previous) = self.console_task.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.page.evaluate("1 + 1".to_string()).await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        if let Some(task) = self.console_task.lock().take() {
            task.abort();
        }
        let page = self.page.clone();
        page.close().await?;
        Ok(())
    }
}
