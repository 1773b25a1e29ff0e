//! Routing of change notifications onto Task keys.

use std::future::Future;
use std::sync::Arc;

use cnat_core::handle_error;
use cnat_events::{
    Job, Notification, NotificationSubscription, Object, ObjectCache, SubscriptionError, Task,
    TASK_KIND,
};
use cnat_workqueue::WorkQueue;
use tracing::{debug, info, warn};

/// Maps notifications to the key of the Task that must be reconciled.
pub struct EventRouter {
    cache: Arc<dyn ObjectCache>,
    queue: Arc<WorkQueue<String>>,
}

impl EventRouter {
    pub fn new(cache: Arc<dyn ObjectCache>, queue: Arc<WorkQueue<String>>) -> Self {
        Self { cache, queue }
    }

    /// Enqueue whatever Task this notification concerns, if any.
    pub fn handle(&self, notification: Notification) {
        match notification {
            Notification::TaskChanged(task) => self.enqueue_task(&task),
            Notification::JobChanged(job) => self.enqueue_owner(&job),
            Notification::Removed(tombstone) => match tombstone.object {
                Some(Object::Job(job)) => {
                    debug!(key = %tombstone.key, "Recovered deleted job from tombstone");
                    self.enqueue_owner(&job);
                }
                Some(Object::Task(_)) => {
                    debug!(key = %tombstone.key, "Task removed");
                }
                None => handle_error(&format!(
                    "error decoding object tombstone for '{}', invalid type",
                    tombstone.key
                )),
            },
        }
    }

    /// Enqueue every cached Task.
    pub fn enqueue_all(&self) {
        let tasks = self.cache.list_tasks();
        debug!(count = tasks.len(), "Enqueuing all cached tasks");
        for task in &tasks {
            self.enqueue_task(task);
        }
    }

    fn enqueue_task(&self, task: &Task) {
        self.queue.add(task.key());
    }

    fn enqueue_owner(&self, job: &Job) {
        let Some(owner) = job.metadata.controller_of() else {
            return;
        };
        if owner.kind != TASK_KIND {
            return;
        }
        match self.cache.get_task(&job.metadata.namespace, &owner.name) {
            Ok(task) if task.metadata.uid == owner.uid => {
                info!(job = %job.key(), task = %task.key(), "Enqueuing task for changed job");
                self.enqueue_task(&task);
            }
            Ok(_) | Err(_) => {
                debug!(job = %job.key(), owner = %owner.name, "Ignoring orphaned job");
            }
        }
    }

    /// Route notifications until `shutdown` completes or the bus closes.
    ///
    /// A lagged subscription has lost notifications, so every cached Task is
    /// enqueued again.
    pub async fn run<F>(&self, mut subscription: NotificationSubscription, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                received = subscription.recv() => match received {
                    Ok(notification) => self.handle(notification),
                    Err(SubscriptionError::Lagged(missed)) => {
                        warn!(missed, "Notification stream lagged, relisting");
                        self.enqueue_all();
                    }
                    Err(SubscriptionError::Closed) => {
                        debug!("Notification stream closed");
                        break;
                    }
                },
            }
        }
    }
}
