//! Controller wiring: router, work queue, workers and resync.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cnat_core::ResultExt;
use cnat_events::{ClusterClient, NotificationSubscription, ObjectCache};
use cnat_workqueue::{WorkQueue, WorkQueueConfig};
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::recorder::EventRecorder;
use crate::reconciler::{Reconciler, ReconcilerConfig};
use crate::router::EventRouter;
use crate::schedule::Clock;
use crate::worker::WorkerPool;

/// Poll interval while waiting for the cache to sync.
const CACHE_SYNC_POLL: Duration = Duration::from_millis(100);

/// Configuration for the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Interval at which every cached Task is enqueued again. `None`
    /// disables resync.
    pub resync_period: Option<Duration>,
    /// How long to wait for the cache's initial listing.
    pub cache_sync_timeout: Duration,
    /// Work queue settings.
    pub queue: WorkQueueConfig,
    /// Reconciler settings.
    pub reconciler: ReconcilerConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            resync_period: Some(Duration::from_secs(30)),
            cache_sync_timeout: Duration::from_secs(30),
            queue: WorkQueueConfig {
                name: "Tasks".to_string(),
                ..WorkQueueConfig::default()
            },
            reconciler: ReconcilerConfig::default(),
        }
    }
}

/// The Task controller.
pub struct Controller {
    config: ControllerConfig,
    cache: Arc<dyn ObjectCache>,
    queue: Arc<WorkQueue<String>>,
    router: Arc<EventRouter>,
    workers: Arc<WorkerPool>,
}

impl Controller {
    /// Create a controller. Must be called within a tokio runtime.
    pub fn new(
        config: ControllerConfig,
        cache: Arc<dyn ObjectCache>,
        client: Arc<dyn ClusterClient>,
        recorder: EventRecorder,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let queue = Arc::new(WorkQueue::new(config.queue.clone()));
        let router = Arc::new(EventRouter::new(Arc::clone(&cache), Arc::clone(&queue)));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&cache),
            client,
            recorder,
            clock,
            config.reconciler.clone(),
        ));
        let workers = Arc::new(WorkerPool::new(Arc::clone(&queue), reconciler));

        Self {
            config,
            cache,
            queue,
            router,
            workers,
        }
    }

    /// The controller's work queue.
    pub fn queue(&self) -> &Arc<WorkQueue<String>> {
        &self.queue
    }

    /// Run until `shutdown` completes.
    ///
    /// Notifications are routed from the start; workers begin only once the
    /// cache has synced. On shutdown the queue stops handing out keys, every
    /// in-flight pass finishes and all background tasks are awaited.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheSyncTimeout`] if the cache does not sync in time
    /// and [`Error::InvalidConfig`] for a zero worker count or unusable
    /// rate limiter settings.
    pub async fn run<F>(self, subscription: NotificationSubscription, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if self.config.workers == 0 {
            return Err(Error::invalid_config("at least one worker is required"));
        }
        self.config
            .queue
            .rate_limiter
            .validate()
            .map_err(|e| Error::invalid_config(e.to_string()))?;

        info!(workers = self.config.workers, "Starting Task controller");
        let (stop_tx, stop_rx) = watch::channel(false);

        let router = Arc::clone(&self.router);
        let router_stop = stop_rx.clone();
        let router_handle = tokio::spawn(async move {
            router.run(subscription, stopped(router_stop)).await;
        });

        info!("Waiting for informer caches to sync");
        if let Err(e) = wait_for_cache_sync(self.cache.as_ref(), self.config.cache_sync_timeout).await
        {
            self.queue.shut_down();
            let _ = stop_tx.send(true);
            router_handle.await.or_report_with("notification router");
            return Err(e);
        }
        self.router.enqueue_all();

        let worker_handles = self.workers.spawn(self.config.workers);
        let resync_handle = self.config.resync_period.map(|period| {
            let router = Arc::clone(&self.router);
            tokio::spawn(resync_loop(router, period, stopped(stop_rx.clone())))
        });
        info!("Started workers");

        shutdown.await;

        info!("Shutting down workers");
        self.queue.shut_down();
        let _ = stop_tx.send(true);
        for result in join_all(worker_handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Worker terminated abnormally");
            }
        }
        if let Some(handle) = resync_handle {
            handle.await.or_report_with("resync loop");
        }
        router_handle.await.or_report_with("notification router");
        info!("Controller stopped");
        Ok(())
    }
}

async fn wait_for_cache_sync(cache: &dyn ObjectCache, timeout: Duration) -> Result<()> {
    let poll = async {
        while !cache.has_synced() {
            tokio::time::sleep(CACHE_SYNC_POLL).await;
        }
    };
    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| Error::CacheSyncTimeout { timeout })
}

async fn resync_loop<F>(router: Arc<EventRouter>, period: Duration, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = ticker.tick() => {
                debug!("Resyncing tasks");
                router.enqueue_all();
            }
        }
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
