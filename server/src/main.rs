//! Headless chart export server.
//!
//! Accepts chart configurations or vector markup over HTTP and returns
//! rendered artifacts, delegating the rendering itself to a pooled
//! headless browser engine.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod cli;
mod lifecycle;
mod state;

use cli::CliArgs;
use common::{Config, ExportService};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // defaults < config file < env < CLI flags
    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    let _log_guard = common::logging::init(&config.logging);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "starting export server"
    );

    if !config.server.enable {
        warn!("server.enable is false; nothing to do");
        return Ok(());
    }

    let config = Arc::new(config);
    let runtime = lifecycle::init(&config).await?;
    let service: Arc<dyn ExportService> = Arc::new(AppState::new(runtime.exporter.clone()));

    let shutdown = CancellationToken::new();
    if config.other.listen_to_process_exits {
        spawn_signal_listener(shutdown.clone());
    }

    let served = hcexport_api::serve(service, config.clone(), shutdown.clone()).await;

    lifecycle::shutdown(&runtime).await;
    served
}

/// Cancel the shutdown token on SIGINT/SIGTERM so the listener stops and
/// the pool drains before the process exits.
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(signal) => signal,
                Err(err) => {
                    warn!(%err, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("shutdown signal received");
        shutdown.cancel();
    });
}
