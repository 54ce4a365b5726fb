//! Command-line surface. Flags override environment variables, which
//! override the config file.

use std::path::PathBuf;

use clap::Parser;

use common::Config;

#[derive(Parser, Debug, Clone)]
#[command(name = "hc-export-server")]
#[command(about = "Headless chart export server")]
#[command(version)]
pub struct CliArgs {
    /// TOML configuration file.
    #[arg(long, short = 'c', env = "HCEXPORT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Host the HTTP server binds to.
    #[arg(long)]
    pub host: Option<String>,

    /// Port the HTTP server binds to.
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Chart library version to fetch ("latest" or a semver fragment).
    #[arg(long)]
    pub highcharts_version: Option<String>,

    /// Directory for the cached library sources.
    #[arg(long)]
    pub cache_path: Option<PathBuf>,

    /// Re-fetch the library sources even when the cache matches.
    #[arg(long)]
    pub force_fetch: bool,

    #[arg(long)]
    pub min_workers: Option<usize>,

    #[arg(long)]
    pub max_workers: Option<usize>,

    #[arg(long)]
    pub work_limit: Option<u64>,

    /// Log verbosity, 0 (silent) to 5 (trace).
    #[arg(long)]
    pub log_level: Option<u8>,

    /// Also write logs to the configured log file.
    #[arg(long)]
    pub log_to_file: bool,

    /// Allow request-supplied code (customCode, callback) in the renderer.
    #[arg(long)]
    pub allow_code_execution: bool,

    /// Allow request resources to reference local files.
    #[arg(long)]
    pub allow_file_resources: bool,

    /// Run the browser with a visible window (debugging).
    #[arg(long)]
    pub headful: bool,
}

impl CliArgs {
    /// Overlay the flags onto an already env-merged configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(version) = &self.highcharts_version {
            config.highcharts.version = version.clone();
        }
        if let Some(path) = &self.cache_path {
            config.highcharts.cache_path = path.clone();
        }
        if self.force_fetch {
            config.highcharts.force_fetch = true;
        }
        if let Some(min) = self.min_workers {
            config.pool.min_workers = min;
        }
        if let Some(max) = self.max_workers {
            config.pool.max_workers = max;
        }
        if let Some(limit) = self.work_limit {
            config.pool.work_limit = limit;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.log_to_file {
            config.logging.to_file = true;
        }
        if self.allow_code_execution {
            config.custom_logic.allow_code_execution = true;
        }
        if self.allow_file_resources {
            config.custom_logic.allow_file_resources = true;
        }
        if self.headful {
            config.debug.headless = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = CliArgs::parse_from([
            "hc-export-server",
            "--port",
            "9001",
            "--max-workers",
            "2",
            "--force-fetch",
            "--allow-code-execution",
        ]);

        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.pool.max_workers, 2);
        assert!(config.highcharts.force_fetch);
        assert!(config.custom_logic.allow_code_execution);
        // Untouched values stay put.
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
