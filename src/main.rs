//! # cnat - scheduled task controller
//!
//! ## Startup
//!
//! 1. **Flags and config file** - `--kubeconfig` is read, `--master` overrides
//!    its endpoint
//! 2. **Store** - connect and seed Task manifests
//! 3. **Controller** - wait for the cache to sync, then start workers
//!
//! Any startup failure exits non-zero with the error chain.
//!
//! ## Shutdown
//!
//! Ctrl+C or SIGTERM stops the work queue, lets in-flight reconciles finish,
//! then flushes pending audit events.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use anyhow::{Context, Result};
use clap::Parser;
use cnat::{Cli, Settings};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;

    info!("cnat controller starting...");
    let settings = Settings::from_cli(&cli)?;
    let cluster = settings.endpoint.connect();

    cnat::run(settings, cluster, wait_for_shutdown()).await?;

    info!("cnat controller stopped gracefully");
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).context("Invalid --log-level filter")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                return wait_for_ctrl_c().await;
            }
        };
        tokio::select! {
            () = wait_for_ctrl_c() => {}
            _ = terminate.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
        }
    }
    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
