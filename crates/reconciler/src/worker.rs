//! Workers draining the work queue.

use std::sync::Arc;

use cnat_core::handle_error;
use cnat_workqueue::WorkQueue;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::reconciler::Reconciler;
use crate::types::ReconcileOutcome;

/// A fixed number of workers pulling keys and reconciling them.
///
/// The queue guarantees a key is held by at most one worker at a time.
pub struct WorkerPool {
    queue: Arc<WorkQueue<String>>,
    reconciler: Arc<Reconciler>,
}

impl WorkerPool {
    pub fn new(queue: Arc<WorkQueue<String>>, reconciler: Arc<Reconciler>) -> Self {
        Self { queue, reconciler }
    }

    /// Spawn `workers` worker loops. They exit once the queue is shut down
    /// and drained.
    pub fn spawn(self: &Arc<Self>, workers: usize) -> Vec<JoinHandle<()>> {
        (0..workers)
            .map(|id| {
                let pool = Arc::clone(self);
                tokio::spawn(async move {
                    debug!(worker = id, "Worker started");
                    while pool.process_next_item().await {}
                    debug!(worker = id, "Worker stopped");
                })
            })
            .collect()
    }

    /// Take one key, reconcile it and record the outcome on the queue.
    ///
    /// Returns `false` once the queue is shut down and empty.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let reconciler = Arc::clone(&self.reconciler);
        let pass_key = key.clone();
        let pass = tokio::spawn(async move { reconciler.reconcile(&pass_key).await }).await;

        match pass {
            Ok(Ok(ReconcileOutcome::Synced)) => {
                self.queue.forget(&key);
                info!(key = %key, "Successfully synced");
            }
            Ok(Ok(ReconcileOutcome::RequeueAfter(delay))) => {
                self.queue.add_after(key.clone(), delay);
                info!(key = %key, ?delay, "Requeued");
            }
            Ok(Err(e)) => {
                self.queue.add_rate_limited(key.clone());
                handle_error(&format!("error syncing '{key}': {e}, requeuing"));
            }
            Err(e) => {
                self.queue.add_rate_limited(key.clone());
                handle_error(&format!("reconcile of '{key}' aborted: {e}, requeuing"));
            }
        }

        self.queue.done(&key);
        true
    }
}
