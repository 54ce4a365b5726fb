//! Asset cache for the renderer-side chart library.
//!
//! The cache holds one concatenated sources blob plus a manifest recording
//! the library version and the module set the blob was built from. Both are
//! persisted in the configured cache directory (`sources.js`,
//! `manifest.json`) and re-fetched from the CDN only on mismatch.

mod cache;
mod error;
mod fetch;
mod manifest;

pub use cache::{extract_version, AssetCache};
pub use error::{CacheError, Result};
pub use manifest::CacheManifest;
