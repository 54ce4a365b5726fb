//! Renderer driver: a thin adapter over the headless browser engine, plus
//! the page factory that turns blank tabs into ready-to-render workers.

mod chrome;
mod engine;
mod error;
mod factory;
mod template;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use chrome::{ChromeEngine, ChromePage};
pub use engine::{Clip, EnginePage, ImageFormat, PdfOpts, RenderEngine, ScreenshotOpts};
pub use error::{RenderError, Result};
pub use factory::PageFactory;
pub use template::{PAGE_TEMPLATE, RENDER_PRELUDE};
