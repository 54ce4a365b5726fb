//! Value types shared between the gateway, the pipeline, and the pool.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Output artifact type of one export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    Jpeg,
    Png,
    Pdf,
    Svg,
}

impl OutputType {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Pdf => "application/pdf",
            Self::Svg => "image/svg+xml",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Pdf => "pdf",
            Self::Svg => "svg",
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Self::Svg)
    }
}

impl std::str::FromStr for OutputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "pdf" => Ok(Self::Pdf),
            "svg" => Ok(Self::Svg),
            other => Err(format!("unsupported output type: {other}")),
        }
    }
}

/// Chart input after classification.
///
/// Vector markup is any string whose leading non-whitespace is `<svg` or
/// `<?xml`; everything else is a structured chart configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartInput {
    Vector(String),
    Config(serde_json::Value),
    /// Raw configuration source set through the size-only CSS injection
    /// path. Only produced when the caller explicitly opted into code
    /// execution.
    Injection(String),
}

impl ChartInput {
    /// Classify a raw string payload.
    pub fn classify(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim_start();
        if trimmed.starts_with("<svg") || trimmed.starts_with("<?xml") {
            return Ok(Self::Vector(raw.to_string()));
        }
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| format!("chart configuration is not valid JSON: {e}"))?;
        if !value.is_object() {
            return Err("chart configuration must be a JSON object".to_string());
        }
        Ok(Self::Config(value))
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Self::Vector(_))
    }
}

/// Per-request renderer-side resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobResources {
    /// Inline script injected into the page.
    pub js: Option<String>,
    /// Inline stylesheet; `@import` directives are lifted to link tags.
    pub css: Option<String>,
    /// File paths or URLs of additional scripts.
    pub files: Vec<String>,
}

impl JobResources {
    pub fn is_empty(&self) -> bool {
        self.js.is_none() && self.css.is_none() && self.files.is_empty()
    }
}

/// A single export request in flight.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub request_id: String,
    pub input: ChartInput,
    pub out_type: OutputType,
    pub height: f64,
    pub width: f64,
    pub scale: f64,
    /// Chart constructor name forwarded to the renderer hook.
    pub constr: String,
    pub callback: Option<String>,
    pub custom_code: Option<String>,
    pub resources: Option<JobResources>,
    pub global_options: Option<serde_json::Value>,
    pub theme_options: Option<serde_json::Value>,
    /// Route renderer errors into the rendered container.
    pub display_errors: bool,
    /// Set by the gateway when the client goes away.
    pub cancel: CancellationToken,
}

/// The rendered artifact handed back to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportArtifact {
    /// Vector output, sent as text.
    Text(String),
    /// Raster or PDF output, already decoded to bytes.
    Binary(Vec<u8>),
}

impl ExportArtifact {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counters mirrored from the pool into the health route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    pub export_attempts: u64,
    pub performed_exports: u64,
    pub dropped_exports: u64,
    pub export_from_svg_attempts: u64,
    /// Total milliseconds spent rendering.
    pub time_spent: u64,
    /// Average milliseconds per performed export.
    pub spent_average: f64,
    pub free: usize,
    pub in_use: usize,
    pub pending_create: usize,
}

/// Liveness + observability snapshot served by `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: String,
    pub service: String,
    pub version: String,
    pub highcharts_version: String,
    pub uptime_secs: u64,
    pub pool: PoolSnapshot,
    /// Success rate over the last 30 minutes, in 1-minute buckets.
    pub success_rate_30m: f64,
}
