//! CDN fetch of the renderer-side script set.

use common::config::HighchartsConfig;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

/// One entry of the canonical fetch list.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScriptSource {
    /// Bare module name recorded in the manifest on success.
    pub name: String,
    pub url: String,
    /// Core scripts are required; a failure aborts the whole fetch.
    pub required: bool,
}

/// Fetches and concatenates the configured script set.
pub struct ScriptFetcher {
    client: reqwest::Client,
}

impl ScriptFetcher {
    pub fn new(user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    /// Fetch every entry of the canonical list. Returns the concatenated
    /// blob and the names of the modules that made it in.
    pub async fn fetch(&self, config: &HighchartsConfig) -> Result<(String, Vec<String>)> {
        let sources = build_sources(config);
        let mut bodies: Vec<String> = Vec::with_capacity(sources.len());
        let mut fetched: Vec<String> = Vec::with_capacity(sources.len());

        for source in &sources {
            debug!(script = %source.name, url = %source.url, "fetching script");
            match self.fetch_one(&source.url).await {
                Ok(body) => {
                    bodies.push(body);
                    fetched.push(source.name.clone());
                }
                Err(reason) if source.required => {
                    return Err(CacheError::RequiredScript {
                        script: source.name.clone(),
                        reason,
                    });
                }
                Err(reason) => {
                    warn!(script = %source.name, %reason, "skipping optional script");
                }
            }
        }

        Ok((bodies.join(";\n"), fetched))
    }

    async fn fetch_one(&self, url: &str) -> std::result::Result<String, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {} from {url}", response.status()));
        }
        response.text().await.map_err(|e| e.to_string())
    }
}

/// Build the canonical URL list from the configured script sets.
///
/// The version segment is empty for `"latest"`, which resolves to the CDN's
/// current release. Map modules and indicators live under their own path
/// segments. Entries that are already URLs are fetched verbatim.
pub(crate) fn build_sources(config: &HighchartsConfig) -> Vec<ScriptSource> {
    let cdn = config.cdn_url.trim_end_matches('/');
    let segment = version_segment(&config.version);
    let mut sources = Vec::new();

    for name in &config.core_scripts {
        sources.push(ScriptSource {
            name: name.clone(),
            url: script_url(cdn, &segment, name, ""),
            required: true,
        });
    }
    for name in &config.module_scripts {
        let url = if name == "map" {
            format!("{cdn}/maps/{segment}modules/map.js")
        } else {
            script_url(cdn, &segment, name, "modules/")
        };
        sources.push(ScriptSource {
            name: name.clone(),
            url,
            required: false,
        });
    }
    for name in &config.indicator_scripts {
        sources.push(ScriptSource {
            name: name.clone(),
            url: format!("{cdn}/stock/{segment}indicators/{name}.js"),
            required: false,
        });
    }
    for url in &config.custom_scripts {
        sources.push(ScriptSource {
            name: url.clone(),
            url: url.clone(),
            required: false,
        });
    }

    sources
}

fn version_segment(version: &str) -> String {
    let trimmed = version.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("latest") {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

fn script_url(cdn: &str, segment: &str, name: &str, category: &str) -> String {
    if name.starts_with("http://") || name.starts_with("https://") {
        return name.to_string();
    }
    let file = if name.ends_with(".js") {
        name.to_string()
    } else {
        format!("{name}.js")
    };
    format!("{cdn}/{segment}{category}{file}")
}
