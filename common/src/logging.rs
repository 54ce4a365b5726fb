//! Tracing setup driven by the `logging` config section.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Map the numeric config level onto a tracing directive.
fn level_directive(level: u8) -> &'static str {
    match level {
        0 => "off",
        1 => "error",
        2 => "warn",
        3 => "info",
        4 => "debug",
        _ => "trace",
    }
}

/// Initialise the global subscriber. Returns the file-writer guard, which
/// must be held for the process lifetime when `to_file` is set.
///
/// `RUST_LOG`, when present, wins over the numeric config level.
pub fn init(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(config.level)));

    let console_layer = config
        .to_console
        .then(|| tracing_subscriber::fmt::layer().boxed());

    let (file_layer, guard) = if config.to_file {
        // The appender writes into an existing directory only.
        let _ = std::fs::create_dir_all(&config.dest);
        let appender = tracing_appender::rolling::never(&config.dest, &config.file);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directive_mapping() {
        assert_eq!(level_directive(0), "off");
        assert_eq!(level_directive(1), "error");
        assert_eq!(level_directive(3), "info");
        assert_eq!(level_directive(5), "trace");
        assert_eq!(level_directive(200), "trace");
    }
}
