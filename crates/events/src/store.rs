//! Cluster store seams and the in-memory implementation.
//!
//! The controller talks to the store through three traits:
//!
//! - [`ObjectCache`]: read-only local mirror, safe for concurrent reads
//! - [`ClusterClient`]: the write API (and live reads that bypass the cache)
//! - [`EventSink`]: the audit event API
//!
//! [`InMemoryCluster`] implements all three and additionally exposes the
//! operations external actors perform (users applying and deleting tasks, the
//! runtime moving jobs through their phases).

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cnat_core::meta_namespace_key;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::bus::{NotificationBus, NotificationSubscription};
use crate::error::{StoreError, StoreResult};
use crate::event::{Notification, Object, Tombstone};
use crate::types::{ClusterEvent, Job, JobPhase, Task, JOB_KIND, TASK_KIND};

/// Read-only view of locally cached objects.
pub trait ObjectCache: Send + Sync {
    /// Look up a cached task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the task is not in the cache.
    fn get_task(&self, namespace: &str, name: &str) -> StoreResult<Task>;

    /// All cached tasks.
    fn list_tasks(&self) -> Vec<Task>;

    /// Whether the initial full listing has been received.
    fn has_synced(&self) -> bool;
}

/// Write API of the cluster store.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Live read of a job, bypassing any cache.
    async fn get_job(&self, namespace: &str, name: &str) -> StoreResult<Job>;

    /// Create a job. Fails with `AlreadyExists` if the name is taken.
    async fn create_job(&self, job: Job) -> StoreResult<Job>;

    /// Replace a task's status. Fails with `Conflict` on a stale
    /// `resource_version`.
    async fn update_task_status(&self, task: Task) -> StoreResult<Task>;
}

/// Destination for audit events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn create_event(&self, event: ClusterEvent) -> StoreResult<()>;
}

/// Store operations that can have a fault injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GetJob,
    CreateJob,
    UpdateTaskStatus,
}

#[derive(Default)]
struct ClusterState {
    tasks: BTreeMap<String, Task>,
    jobs: BTreeMap<String, Job>,
    last_version: u64,
}

impl ClusterState {
    fn next_version(&mut self) -> u64 {
        self.last_version = self.last_version.saturating_add(1);
        self.last_version
    }
}

/// In-process cluster store with change notifications.
pub struct InMemoryCluster {
    state: RwLock<ClusterState>,
    bus: NotificationBus,
    events: Mutex<Vec<ClusterEvent>>,
    faults: Mutex<VecDeque<(Operation, StoreError)>>,
    synced: AtomicBool,
}

impl InMemoryCluster {
    /// Create an empty, synced cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::with_bus(NotificationBus::new())
    }

    /// Create an empty cluster wrapped in an Arc.
    #[must_use]
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Create an empty cluster publishing on the given bus.
    #[must_use]
    pub fn with_bus(bus: NotificationBus) -> Self {
        Self {
            state: RwLock::new(ClusterState::default()),
            bus,
            events: Mutex::new(Vec::new()),
            faults: Mutex::new(VecDeque::new()),
            synced: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> NotificationSubscription {
        self.bus.subscribe()
    }

    #[must_use]
    pub const fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    /// Mark the cache as (not) having completed its initial listing.
    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::Release);
    }

    /// Make the next call of `operation` fail with `error`.
    pub fn inject_fault(&self, operation: Operation, error: StoreError) {
        self.faults.lock().push_back((operation, error));
    }

    fn take_fault(&self, operation: Operation) -> StoreResult<()> {
        let mut faults = self.faults.lock();
        match faults.iter().position(|(op, _)| *op == operation) {
            Some(index) => match faults.remove(index) {
                Some((_, error)) => Err(error),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    /// Create a task, or replace the spec of an existing one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when the task has no name.
    pub fn apply_task(&self, mut task: Task) -> StoreResult<Task> {
        if task.metadata.name.is_empty() {
            return Err(StoreError::invalid(TASK_KIND, "metadata.name is required"));
        }
        let key = task.key();
        let stored = {
            let mut state = self.state.write();
            let version = state.next_version();
            let stored = match state.tasks.get(&key) {
                Some(existing) => {
                    let mut updated = existing.clone();
                    updated.spec = task.spec;
                    updated.metadata.labels = task.metadata.labels;
                    updated
                }
                None => {
                    task.metadata.uid = Uuid::new_v4().to_string();
                    task
                }
            };
            let mut stored = stored;
            stored.metadata.resource_version = version;
            state.tasks.insert(key.clone(), stored.clone());
            stored
        };
        debug!(key = %key, "Task applied");
        self.bus.publish(Notification::TaskChanged(stored.clone()));
        Ok(stored)
    }

    /// Delete a task and every job it controls.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the task does not exist.
    pub fn delete_task(&self, namespace: &str, name: &str) -> StoreResult<()> {
        let key = meta_namespace_key(namespace, name);
        let (task, jobs) = {
            let mut state = self.state.write();
            let task = state
                .tasks
                .remove(&key)
                .ok_or_else(|| StoreError::not_found(TASK_KIND, &key))?;
            let owned: Vec<String> = state
                .jobs
                .iter()
                .filter(|(_, job)| {
                    job.metadata.namespace == task.metadata.namespace
                        && job.metadata.controller_of().is_some_and(|owner| {
                            owner.kind == TASK_KIND && owner.uid == task.metadata.uid
                        })
                })
                .map(|(job_key, _)| job_key.clone())
                .collect();
            let jobs: Vec<Job> = owned
                .iter()
                .filter_map(|job_key| state.jobs.remove(job_key))
                .collect();
            (task, jobs)
        };
        info!(key = %key, cascaded = jobs.len(), "Task deleted");
        self.bus
            .publish(Notification::Removed(Tombstone::of(Object::Task(task))));
        for job in jobs {
            self.bus
                .publish(Notification::Removed(Tombstone::of(Object::Job(job))));
        }
        Ok(())
    }

    /// Move a job to a new phase, as the execution runtime would.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the job does not exist.
    pub fn set_job_phase(
        &self,
        namespace: &str,
        name: &str,
        phase: JobPhase,
        reason: Option<String>,
        message: Option<String>,
    ) -> StoreResult<Job> {
        let key = meta_namespace_key(namespace, name);
        let updated = {
            let mut state = self.state.write();
            let version = state.next_version();
            let job = state
                .jobs
                .get_mut(&key)
                .ok_or_else(|| StoreError::not_found(JOB_KIND, &key))?;
            job.status.phase = phase;
            job.status.reason = reason;
            job.status.message = message;
            job.metadata.resource_version = version;
            job.clone()
        };
        debug!(key = %key, phase = %phase, "Job phase changed");
        self.bus.publish(Notification::JobChanged(updated.clone()));
        Ok(updated)
    }

    #[must_use]
    pub fn list_jobs(&self) -> Vec<Job> {
        self.state.read().jobs.values().cloned().collect()
    }

    /// Audit events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<ClusterEvent> {
        self.events.lock().clone()
    }
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectCache for InMemoryCluster {
    fn get_task(&self, namespace: &str, name: &str) -> StoreResult<Task> {
        let key = meta_namespace_key(namespace, name);
        self.state
            .read()
            .tasks
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(TASK_KIND, key))
    }

    fn list_tasks(&self) -> Vec<Task> {
        self.state.read().tasks.values().cloned().collect()
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get_job(&self, namespace: &str, name: &str) -> StoreResult<Job> {
        self.take_fault(Operation::GetJob)?;
        let key = meta_namespace_key(namespace, name);
        self.state
            .read()
            .jobs
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(JOB_KIND, key))
    }

    async fn create_job(&self, mut job: Job) -> StoreResult<Job> {
        self.take_fault(Operation::CreateJob)?;
        if job.metadata.name.is_empty() {
            return Err(StoreError::invalid(JOB_KIND, "metadata.name is required"));
        }
        let key = job.key();
        let created = {
            let mut state = self.state.write();
            if state.jobs.contains_key(&key) {
                return Err(StoreError::already_exists(JOB_KIND, key));
            }
            let version = state.next_version();
            job.metadata.uid = Uuid::new_v4().to_string();
            job.metadata.resource_version = version;
            state.jobs.insert(key.clone(), job.clone());
            job
        };
        debug!(key = %key, "Job created");
        self.bus.publish(Notification::JobChanged(created.clone()));
        Ok(created)
    }

    async fn update_task_status(&self, task: Task) -> StoreResult<Task> {
        self.take_fault(Operation::UpdateTaskStatus)?;
        let key = task.key();
        let updated = {
            let mut state = self.state.write();
            let version = state.next_version();
            let stored = state
                .tasks
                .get_mut(&key)
                .ok_or_else(|| StoreError::not_found(TASK_KIND, &key))?;
            if stored.metadata.resource_version != task.metadata.resource_version {
                return Err(StoreError::conflict(TASK_KIND, key));
            }
            stored.status = task.status;
            stored.metadata.resource_version = version;
            stored.clone()
        };
        debug!(key = %key, phase = %updated.status.phase, "Task status updated");
        self.bus.publish(Notification::TaskChanged(updated.clone()));
        Ok(updated)
    }
}

#[async_trait]
impl EventSink for InMemoryCluster {
    async fn create_event(&self, event: ClusterEvent) -> StoreResult<()> {
        self.events.lock().push(event);
        Ok(())
    }
}
