//! Configuration system for the export server.
//!
//! Sources are merged with fixed precedence:
//! defaults < TOML config file < environment variables < CLI flags.
//! Per-request payload fields override export options for a single job only
//! and are handled in the gateway, not here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Top-level configuration, one struct per section.
///
/// Every section and every field carries a serde default so a partial TOML
/// file overlays the built-in defaults field by field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub highcharts: HighchartsConfig,
    pub export: ExportConfig,
    pub custom_logic: CustomLogicConfig,
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub logging: LoggingConfig,
    pub other: OtherConfig,
    pub debug: DebugConfig,
}

/// Renderer-side library sources: what to fetch and where to keep it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HighchartsConfig {
    /// Library version, `"latest"` or a semver fragment like `"11.4.8"`.
    pub version: String,
    /// Base CDN URL the script set is resolved against.
    pub cdn_url: String,
    /// Re-fetch on startup even when the cached manifest matches.
    pub force_fetch: bool,
    /// Directory holding `sources.js` and `manifest.json`.
    pub cache_path: PathBuf,
    /// Core scripts; a fetch failure here is fatal.
    pub core_scripts: Vec<String>,
    /// Optional module scripts; failures are logged and skipped.
    pub module_scripts: Vec<String>,
    /// Technical-indicator scripts (stock path segment).
    pub indicator_scripts: Vec<String>,
    /// Fully-qualified extra script URLs fetched verbatim.
    pub custom_scripts: Vec<String>,
    /// Token required by the admin version-switch route (`hc-auth` header).
    pub admin_token: Option<String>,
}

impl Default for HighchartsConfig {
    fn default() -> Self {
        Self {
            version: "latest".to_string(),
            cdn_url: "https://code.highcharts.com/".to_string(),
            force_fetch: false,
            cache_path: PathBuf::from(".cache"),
            core_scripts: vec![
                "highcharts".to_string(),
                "highcharts-more".to_string(),
                "highcharts-3d".to_string(),
            ],
            module_scripts: vec![
                "stock".to_string(),
                "map".to_string(),
                "gantt".to_string(),
                "exporting".to_string(),
                "parallel-coordinates".to_string(),
                "solid-gauge".to_string(),
                "sankey".to_string(),
                "treemap".to_string(),
                "heatmap".to_string(),
                "sunburst".to_string(),
                "xrange".to_string(),
                "streamgraph".to_string(),
                "timeline".to_string(),
                "annotations".to_string(),
                "series-label".to_string(),
                "accessibility".to_string(),
                "debugger".to_string(),
            ],
            indicator_scripts: vec!["indicators-all".to_string()],
            custom_scripts: Vec::new(),
            admin_token: None,
        }
    }
}

/// Per-export defaults; each may be overridden by the request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportConfig {
    /// Default output type when the request does not name one.
    #[serde(rename = "type")]
    pub out_type: String,
    /// Chart constructor: `chart`, `stockChart`, `mapChart`, `ganttChart`.
    pub constr: String,
    pub default_height: u32,
    pub default_width: u32,
    pub default_scale: f64,
    /// Upper bound on a single rasterization call, in milliseconds.
    pub rasterization_timeout: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            out_type: "png".to_string(),
            constr: "chart".to_string(),
            default_height: 400,
            default_width: 600,
            default_scale: 1.0,
            rasterization_timeout: 1500,
        }
    }
}

/// Per-request code and resource injection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomLogicConfig {
    /// Allow `customCode`/`callback` strings to reach the renderer page.
    pub allow_code_execution: bool,
    /// Allow per-request resources to name local file paths.
    pub allow_file_resources: bool,
    pub custom_code: Option<String>,
    pub callback: Option<String>,
    /// Default resources applied when the request carries none.
    pub resources: Option<String>,
    pub load_config: Option<String>,
    pub create_config: Option<String>,
}

impl Default for CustomLogicConfig {
    fn default() -> Self {
        Self {
            allow_code_execution: false,
            allow_file_resources: false,
            custom_code: None,
            callback: None,
            resources: None,
            load_config: None,
            create_config: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub enable: bool,
    pub host: String,
    pub port: u16,
    /// Maximum accepted request body, in bytes.
    pub max_body_size: usize,
    /// Directory of UI static files served at `GET /`; disabled when unset.
    pub ui_path: Option<PathBuf>,
    pub ssl: SslConfig,
    pub rate_limiting: RateLimitingConfig,
    pub proxy: ProxyConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enable: true,
            host: "0.0.0.0".to_string(),
            port: 7801,
            max_body_size: 50 * 1024 * 1024,
            ui_path: None,
            ssl: SslConfig::default(),
            rate_limiting: RateLimitingConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

/// TLS listener settings. Parsed and carried; the listener wiring itself is
/// fronted by the deployment, not this binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SslConfig {
    pub enable: bool,
    pub force: bool,
    pub port: u16,
    pub cert_path: Option<PathBuf>,
}

impl Default for SslConfig {
    fn default() -> Self {
        Self {
            enable: false,
            force: false,
            port: 443,
            cert_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitingConfig {
    pub enable: bool,
    /// Requests allowed per client IP within `window`.
    pub max_requests: u32,
    /// Window length in minutes.
    pub window: u64,
    /// Requests past this count are delayed before the hard cap applies.
    /// Zero disables the delay tier.
    pub delay: u32,
    /// Read the client IP from `X-Forwarded-For` instead of the socket.
    pub trust_proxy: bool,
    /// Requests carrying `key=<skipKey>` and `access_token=<skipToken>`
    /// query parameters bypass the limiter entirely.
    pub skip_key: Option<String>,
    pub skip_token: Option<String>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enable: false,
            max_requests: 10,
            window: 1,
            delay: 0,
            trust_proxy: false,
            skip_key: None,
            skip_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Proxy connect timeout in milliseconds.
    pub timeout: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            timeout: 5000,
        }
    }
}

/// Worker pool policy. All timeouts and intervals are milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Jobs a single page serves before rotation.
    pub work_limit: u64,
    pub acquire_timeout: u64,
    pub create_timeout: u64,
    pub destroy_timeout: u64,
    /// Free resources idle longer than this are reaped.
    pub idle_timeout: u64,
    pub create_retry_interval: u64,
    pub reaper_interval: u64,
    /// When positive, a background tick keeps the pool at `min_workers`.
    pub resources_interval: u64,
    pub benchmarking: bool,
    /// Hard-reset a page when it survives validation on reuse.
    pub rotate_hard_reset: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 4,
            max_workers: 8,
            work_limit: 40,
            acquire_timeout: 5000,
            create_timeout: 5000,
            destroy_timeout: 5000,
            idle_timeout: 30_000,
            create_retry_interval: 200,
            reaper_interval: 1000,
            resources_interval: 0,
            benchmarking: false,
            rotate_hard_reset: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// 0 = silent, 1 = error, 2 = warn, 3 = info, 4 = debug, 5 = trace.
    pub level: u8,
    pub file: String,
    /// Directory log files are written into.
    pub dest: PathBuf,
    pub to_console: bool,
    pub to_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: 3,
            file: "hc-export-server.log".to_string(),
            dest: PathBuf::from("log"),
            to_console: true,
            to_file: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OtherConfig {
    /// Hard-reset pages between jobs instead of the soft container swap.
    pub hard_reset_page: bool,
    /// Launch the browser in headless shell mode.
    pub browser_shell_mode: bool,
    /// Install signal handlers that drain the pool before exit.
    pub listen_to_process_exits: bool,
}

impl Default for OtherConfig {
    fn default() -> Self {
        Self {
            hard_reset_page: false,
            browser_shell_mode: true,
            listen_to_process_exits: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebugConfig {
    pub headless: bool,
    pub devtools: bool,
    /// Forward page console messages into the server log.
    pub listen_to_console: bool,
    /// Per-operation delay injected by the browser, in milliseconds.
    pub slow_mo: u64,
    pub debugging_port: u16,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            headless: true,
            devtools: false,
            listen_to_console: false,
            slow_mo: 0,
            debugging_port: 9222,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then the custom JSON
    /// overlay named by `customLogic.loadConfig`, then environment
    /// variables. CLI flags are applied by the binary on top.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = match file {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        if let Some(overlay) = config.custom_logic.load_config.clone() {
            config = config.overlay_json_file(Path::new(&overlay))?;
        }
        config.apply_env();
        Ok(config)
    }

    /// Merge a partial JSON configuration over this one, field by field.
    fn overlay_json_file(self, path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read custom config {}", path.display()))?;
        let overlay: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse custom config {}", path.display()))?;
        let mut base = serde_json::to_value(&self).context("failed to serialise configuration")?;
        merge_values(&mut base, overlay);
        serde_json::from_value(base).context("failed to apply custom config overlay")
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Overlay the documented environment variables onto `self`.
    pub fn apply_env(&mut self) {
        fn env_str(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }
        fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
            env_str(name).and_then(|v| v.parse().ok())
        }
        fn env_bool(name: &str) -> Option<bool> {
            env_str(name).map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        }

        if let Some(v) = env_str("HIGHCHARTS_VERSION") {
            self.highcharts.version = v;
        }
        if let Some(v) = env_str("HIGHCHARTS_CDN_URL") {
            self.highcharts.cdn_url = v;
        }
        if let Some(v) = env_bool("HIGHCHARTS_FORCE_FETCH") {
            self.highcharts.force_fetch = v;
        }
        if let Some(v) = env_str("HIGHCHARTS_CACHE_PATH") {
            self.highcharts.cache_path = PathBuf::from(v);
        }
        if let Some(v) = env_str("HIGHCHARTS_ADMIN_AUTH_TOKEN") {
            self.highcharts.admin_token = Some(v);
        }

        if let Some(v) = env_str("EXPORT_TYPE") {
            self.export.out_type = v;
        }
        if let Some(v) = env_parse("EXPORT_RASTERIZATION_TIMEOUT") {
            self.export.rasterization_timeout = v;
        }

        if let Some(v) = env_bool("CUSTOM_LOGIC_ALLOW_CODE_EXECUTION") {
            self.custom_logic.allow_code_execution = v;
        }
        if let Some(v) = env_bool("CUSTOM_LOGIC_ALLOW_FILE_RESOURCES") {
            self.custom_logic.allow_file_resources = v;
        }

        if let Some(v) = env_str("SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(v) = env_parse("SERVER_PORT") {
            self.server.port = v;
        }
        if let Some(v) = env_bool("RATE_LIMITING_ENABLE") {
            self.server.rate_limiting.enable = v;
        }
        if let Some(v) = env_parse("RATE_LIMITING_MAX_REQUESTS") {
            self.server.rate_limiting.max_requests = v;
        }

        if let Some(v) = env_parse("POOL_MIN_WORKERS") {
            self.pool.min_workers = v;
        }
        if let Some(v) = env_parse("POOL_MAX_WORKERS") {
            self.pool.max_workers = v;
        }
        if let Some(v) = env_parse("POOL_WORK_LIMIT") {
            self.pool.work_limit = v;
        }
        if let Some(v) = env_parse("POOL_ACQUIRE_TIMEOUT") {
            self.pool.acquire_timeout = v;
        }
        if let Some(v) = env_parse("POOL_RESOURCES_INTERVAL") {
            self.pool.resources_interval = v;
        }

        if let Some(v) = env_parse("LOGGING_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env_bool("LOGGING_TO_FILE") {
            self.logging.to_file = v;
        }

        if let Some(v) = env_bool("OTHER_HARD_RESET_PAGE") {
            self.other.hard_reset_page = v;
        }
        if let Some(v) = env_bool("DEBUG_HEADLESS") {
            self.debug.headless = v;
        }
    }

    /// The set of module names the cache manifest is validated against:
    /// core + module + indicator scripts, bare names only.
    pub fn requested_modules(&self) -> Vec<String> {
        self.highcharts
            .core_scripts
            .iter()
            .chain(self.highcharts.module_scripts.iter())
            .chain(self.highcharts.indicator_scripts.iter())
            .cloned()
            .collect()
    }
}

/// Recursive JSON merge: objects merge key-wise, everything else is
/// replaced by the overlay.
fn merge_values(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 7801);
        assert_eq!(config.export.out_type, "png");
        assert_eq!(config.export.rasterization_timeout, 1500);
        assert_eq!(config.pool.work_limit, 40);
        assert!(!config.highcharts.force_fetch);
    }

    #[test]
    fn test_partial_file_overlays_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[highcharts]
version = "10.3.3"

[pool]
maxWorkers = 2
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.highcharts.version, "10.3.3");
        assert_eq!(config.pool.max_workers, 2);
        // Untouched sections keep their defaults.
        assert_eq!(config.pool.min_workers, 4);
        assert_eq!(config.server.port, 7801);
    }

    #[test]
    fn test_requested_modules_spans_categories() {
        let config = Config::default();
        let modules = config.requested_modules();
        assert!(modules.contains(&"highcharts".to_string()));
        assert!(modules.contains(&"stock".to_string()));
        assert!(modules.contains(&"indicators-all".to_string()));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load(Some(Path::new("does-not-exist.toml"))).unwrap();
        assert_eq!(config.server.port, 7801);
    }

    #[test]
    fn test_custom_json_overlay_merges_deep() {
        let mut json_file = tempfile::NamedTempFile::new().unwrap();
        write!(
            json_file,
            r#"{{"pool": {{"workLimit": 7}}, "export": {{"type": "pdf"}}}}"#
        )
        .unwrap();

        let mut toml_file = tempfile::NamedTempFile::new().unwrap();
        write!(
            toml_file,
            r#"
[customLogic]
loadConfig = "{}"

[pool]
maxWorkers = 3
"#,
            json_file.path().display()
        )
        .unwrap();

        let config = Config::load(Some(toml_file.path())).unwrap();
        // JSON overlay wins over the file for the fields it names.
        assert_eq!(config.pool.work_limit, 7);
        assert_eq!(config.export.out_type, "pdf");
        // Fields it does not name keep the file/defaults.
        assert_eq!(config.pool.max_workers, 3);
        assert_eq!(config.pool.min_workers, 4);
    }
}
