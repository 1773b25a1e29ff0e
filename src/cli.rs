//! CLI definitions using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use cnat_reconciler::ControllerConfig;

/// cnat - run a command once at a scheduled time
#[derive(Parser, Debug)]
#[command(name = "cnat")]
#[command(version)]
#[command(about = "Controller that runs each Task's command once its schedule is reached")]
pub struct Cli {
    /// Store endpoint. Overrides the endpoint in the config file.
    #[arg(long)]
    pub master: Option<String>,

    /// Path to the local credentials/config file (TOML)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Number of concurrent reconcile workers
    #[arg(long, default_value_t = 2)]
    pub workers: usize,

    /// Seconds between full resyncs (0 disables)
    #[arg(long, default_value_t = 30)]
    pub resync_period: u64,

    /// Seconds to wait for the cache's initial listing
    #[arg(long, default_value_t = 30)]
    pub cache_sync_timeout: u64,

    /// Log filter, e.g. `info` or `cnat_reconciler=debug`. Defaults to
    /// `RUST_LOG`, then `info`.
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Controller settings selected on the command line.
    #[must_use]
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers,
            resync_period: (self.resync_period > 0)
                .then(|| Duration::from_secs(self.resync_period)),
            cache_sync_timeout: Duration::from_secs(self.cache_sync_timeout),
            ..ControllerConfig::default()
        }
    }
}
