//! The process-wide asset cache: sources blob + manifest, validated on
//! startup and refreshed by the admin version switch.

use std::path::PathBuf;
use std::sync::Arc;

use common::config::HighchartsConfig;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::Result;
use crate::fetch::ScriptFetcher;
use crate::manifest::CacheManifest;

const SOURCES_FILE: &str = "sources.js";
const MANIFEST_FILE: &str = "manifest.json";

struct CacheState {
    config: HighchartsConfig,
    blob: Arc<String>,
    version: String,
    manifest: CacheManifest,
}

/// Fetch-once, validate-on-startup store of the renderer-side library blob.
///
/// Mutated only under the write lock: startup `ensure` and the admin version
/// switch. Readers take a blob snapshot and keep it for the lifetime of the
/// page it was installed into, so a switch never disturbs in-flight exports.
pub struct AssetCache {
    state: RwLock<CacheState>,
    fetcher: ScriptFetcher,
}

impl AssetCache {
    pub fn new(config: HighchartsConfig) -> Self {
        Self {
            state: RwLock::new(CacheState {
                config,
                blob: Arc::new(String::new()),
                version: String::new(),
                manifest: CacheManifest::new("", Vec::new()),
            }),
            fetcher: ScriptFetcher::new(concat!("hc-export-server/", env!("CARGO_PKG_VERSION"))),
        }
    }

    /// Make the on-disk blob and manifest match the configuration, fetching
    /// when the manifest is absent, stale, or `force_fetch` is set.
    /// Idempotent: a second call with an unchanged configuration touches
    /// neither the network nor the files.
    pub async fn ensure(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let force = state.config.force_fetch;
        Self::ensure_locked(&self.fetcher, &mut state, force).await
    }

    /// Switch the active library version and re-run `ensure`. On failure the
    /// previous version (and state) is restored before the error surfaces.
    pub async fn switch_version(&self, new_version: &str) -> Result<String> {
        let mut state = self.state.write().await;
        let previous = state.config.version.clone();
        state.config.version = new_version.trim().to_string();

        match Self::ensure_locked(&self.fetcher, &mut state, false).await {
            Ok(()) => {
                info!(version = %state.version, "library version switched");
                Ok(state.version.clone())
            }
            Err(err) => {
                warn!(%err, "version switch failed, restoring previous version");
                state.config.version = previous;
                Err(err)
            }
        }
    }

    /// The library version extracted from the blob's leading comment, or an
    /// empty string when no blob has been loaded.
    pub async fn version(&self) -> String {
        self.state.read().await.version.clone()
    }

    /// Snapshot of the current sources blob.
    pub async fn blob(&self) -> Arc<String> {
        self.state.read().await.blob.clone()
    }

    /// Whether a module made it into the active manifest.
    pub async fn has_module(&self, name: &str) -> bool {
        self.state.read().await.manifest.contains(name)
    }

    pub async fn active_manifest(&self) -> CacheManifest {
        self.state.read().await.manifest.clone()
    }

    async fn ensure_locked(
        fetcher: &ScriptFetcher,
        state: &mut CacheState,
        force: bool,
    ) -> Result<()> {
        let dir = state.config.cache_path.clone();
        tokio::fs::create_dir_all(&dir).await?;

        let requested = requested_modules(&state.config);
        let on_disk = read_manifest(&dir).await;

        if !force {
            if let Some(manifest) = &on_disk {
                if manifest.satisfies(&state.config.version, &requested) {
                    // Already in memory and matching: nothing to do.
                    if state.manifest == *manifest && !state.blob.is_empty() {
                        return Ok(());
                    }
                    // Valid files from a previous run: load, no fetch.
                    match tokio::fs::read_to_string(dir.join(SOURCES_FILE)).await {
                        Ok(sources) => {
                            info!(version = %manifest.version, "using cached library sources");
                            apply(state, sources, manifest.clone());
                            return Ok(());
                        }
                        Err(err) => {
                            warn!(%err, "manifest present but sources unreadable, re-fetching");
                        }
                    }
                }
            }
        }

        info!(version = %state.config.version, "fetching library sources");
        let (blob, modules) = fetcher.fetch(&state.config).await?;
        // Custom script URLs are fetched into the blob but stay out of the
        // manifest set, which is validated against the configured module
        // names only.
        let manifest = CacheManifest::new(
            state.config.version.clone(),
            modules.into_iter().filter(|m| requested.contains(m)),
        );

        // Files first, then memory, so the on-disk manifest always matches
        // the in-memory one after a successful update.
        tokio::fs::write(dir.join(SOURCES_FILE), &blob).await?;
        let serialized = serde_json::to_vec_pretty(&manifest)?;
        tokio::fs::write(dir.join(MANIFEST_FILE), serialized).await?;

        apply(state, blob, manifest);
        info!(version = %state.version, "library sources updated");
        Ok(())
    }
}

fn apply(state: &mut CacheState, sources: String, manifest: CacheManifest) {
    state.version = extract_version(&sources);
    state.blob = Arc::new(sources);
    state.manifest = manifest;
}

fn requested_modules(config: &HighchartsConfig) -> Vec<String> {
    config
        .core_scripts
        .iter()
        .chain(config.module_scripts.iter())
        .chain(config.indicator_scripts.iter())
        .cloned()
        .collect()
}

async fn read_manifest(dir: &PathBuf) -> Option<CacheManifest> {
    let raw = tokio::fs::read_to_string(dir.join(MANIFEST_FILE)).await.ok()?;
    match serde_json::from_str(&raw) {
        Ok(manifest) => Some(manifest),
        Err(err) => {
            warn!(%err, "cache manifest unreadable, treating as absent");
            None
        }
    }
}

/// Take the substring of the blob before the first `*/`, strip the leading
/// `/*` and surrounding whitespace. Empty when the blob was never loaded.
pub fn extract_version(sources: &str) -> String {
    match sources.find("*/") {
        Some(end) => sources[..end]
            .trim_start()
            .trim_start_matches("/*")
            .trim()
            .to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_version() {
        assert_eq!(extract_version("/* 10.3.3 */ code"), "10.3.3");
        assert_eq!(
            extract_version("/*\n Highcharts JS v11.4.8 (2024-08-29)\n*/var x;"),
            "Highcharts JS v11.4.8 (2024-08-29)"
        );
        assert_eq!(extract_version(""), "");
        assert_eq!(extract_version("no comment here"), "");
    }
}
