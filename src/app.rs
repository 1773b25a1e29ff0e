//! Process bootstrap: seed the store, start the controller, shut down.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use cnat_events::{load_tasks, InMemoryCluster, LocalJobRunner};
use cnat_reconciler::{Controller, ControllerConfig, EventBroadcaster, SystemClock, CONTROLLER_NAME};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::config::{ClusterConfig, Endpoint};

/// Everything needed to start the controller.
#[derive(Debug, Clone)]
pub struct Settings {
    pub endpoint: Endpoint,
    pub cluster: ClusterConfig,
    pub controller: ControllerConfig,
}

impl Settings {
    /// Combine the command line with the config file it names.
    ///
    /// # Errors
    ///
    /// Fails if the config file cannot be read or parsed, or the endpoint is
    /// not supported.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let cluster = match &cli.kubeconfig {
            Some(path) => ClusterConfig::load(path)
                .with_context(|| format!("Error building kubeconfig from {}", path.display()))?,
            None => ClusterConfig::default(),
        };
        let endpoint = Endpoint::resolve(cli.master.as_deref(), &cluster)
            .context("Error resolving store endpoint")?;
        Ok(Self {
            endpoint,
            cluster,
            controller: cli.controller_config(),
        })
    }
}

/// Run the controller against `cluster` until `shutdown` completes.
///
/// # Errors
///
/// Fails if the seed manifests cannot be loaded or applied, or the
/// controller cannot start.
pub async fn run<F>(settings: Settings, cluster: Arc<InMemoryCluster>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let subscription = cluster.subscribe();

    if let Some(path) = &settings.cluster.manifests {
        let tasks = load_tasks(path).context("Error loading task manifests")?;
        info!(count = tasks.len(), path = %path.display(), "Seeding tasks");
        for task in tasks {
            cluster
                .apply_task(task)
                .context("Error applying task manifest")?;
        }
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let runner = settings.cluster.run_jobs.then(|| {
        info!("Running jobs locally");
        tokio::spawn(LocalJobRunner::new(Arc::clone(&cluster)).run(stopped(stop_rx.clone())))
    });

    let broadcaster = EventBroadcaster::start(cluster.clone());
    let controller = Controller::new(
        settings.controller,
        cluster.clone(),
        cluster.clone(),
        broadcaster.new_recorder(CONTROLLER_NAME),
        Arc::new(SystemClock),
    );

    let result = controller.run(subscription, shutdown).await;

    let _ = stop_tx.send(true);
    if let Some(handle) = runner {
        if let Err(e) = handle.await {
            warn!(error = %e, "Job runner terminated abnormally");
        }
    }
    broadcaster.shutdown().await;

    result.context("Error running controller")
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
