//! Reconciler implementation.
//!
//! One pass reads the cached Task, computes the status it should have from
//! current observations, performs at most one side effect and writes the
//! status back only if it changed:
//!
//! | observed phase | condition            | action                  | next phase |
//! |----------------|----------------------|-------------------------|------------|
//! | unset          |                      | none                    | Pending    |
//! | Pending        | schedule in future   | requeue after the wait  | Pending    |
//! | Pending        | schedule due         | record `Executing`      | Running    |
//! | Running        | no Job               | create Job              | Running    |
//! | Running        | Job still running    | none                    | Running    |
//! | Running        | Job finished         | record `Completed`      | Done       |
//! | Done / other   |                      | none                    | unchanged  |

use std::collections::BTreeMap;
use std::sync::Arc;

use cnat_core::{handle_error, split_meta_namespace_key, ResultExt};
use cnat_events::{
    ClusterClient, Container, Job, JobSpec, JobStatus, ObjectCache, ObjectMeta, Phase,
    RestartPolicy, Task, TaskStatus,
};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::recorder::EventRecorder;
use crate::schedule::{time_until_schedule, Clock, SystemClock};
use crate::types::{ReconcileOutcome, StatusDiff};

/// Component name attached to recorded events.
pub const CONTROLLER_NAME: &str = "cnat-controller";

/// Appended to the Task name to form the name of its Job.
pub const JOB_NAME_SUFFIX: &str = "-job";

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Image of the Job's single container.
    pub job_image: String,
    /// Name of the Job's single container.
    pub container_name: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            job_image: "busybox".to_string(),
            container_name: "busybox".to_string(),
        }
    }
}

/// Build the Job that executes `task`'s command.
///
/// The Job is named `<task>-job`, lives in the Task's namespace, is labelled
/// `app=<task>` and is controlled by the Task. The command is split on
/// whitespace with no quoting or escaping.
#[must_use]
pub fn new_job_for_task(task: &Task, config: &ReconcilerConfig) -> Job {
    let mut metadata = ObjectMeta::new(
        task.metadata.namespace.clone(),
        format!("{}{JOB_NAME_SUFFIX}", task.metadata.name),
    );
    metadata.labels = BTreeMap::from([("app".to_string(), task.metadata.name.clone())]);
    metadata.owner_references = vec![task.controller_reference()];

    Job {
        metadata,
        spec: JobSpec {
            containers: vec![Container {
                name: config.container_name.clone(),
                image: config.job_image.clone(),
                command: task
                    .spec
                    .command
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
            }],
            restart_policy: RestartPolicy::OnFailure,
        },
        status: JobStatus::default(),
    }
}

/// Drives Tasks through `unset -> Pending -> Running -> Done`.
pub struct Reconciler {
    cache: Arc<dyn ObjectCache>,
    client: Arc<dyn ClusterClient>,
    recorder: EventRecorder,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        cache: Arc<dyn ObjectCache>,
        client: Arc<dyn ClusterClient>,
        recorder: EventRecorder,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            cache,
            client,
            recorder,
            clock,
            config,
        }
    }

    /// Reconcile the Task identified by `key`.
    ///
    /// A malformed key or a Task that no longer exists is reported and
    /// treated as synced.
    ///
    /// # Errors
    ///
    /// Returns an error when the schedule cannot be parsed or a store call
    /// fails. The caller retries with backoff.
    pub async fn reconcile(&self, key: &str) -> Result<ReconcileOutcome> {
        info!(key, "Reconciling task");

        let Some((namespace, name)) = split_meta_namespace_key(key).or_report() else {
            return Ok(ReconcileOutcome::Synced);
        };

        let original = match self.cache.get_task(&namespace, &name) {
            Ok(task) => task,
            Err(e) if e.is_not_found() => {
                handle_error(&format!("task '{key}' in work queue no longer exists"));
                return Ok(ReconcileOutcome::Synced);
            }
            Err(e) => return Err(e.into()),
        };

        let (status, outcome) = self.next_status(&original).await?;

        if let Some(diff) = StatusDiff::between(&original.status, &status) {
            if !diff.is_forward() {
                handle_error(&format!("refusing to move task '{key}' backwards: {diff}"));
                return Ok(ReconcileOutcome::Synced);
            }
            info!(key, %diff, "Updating task status");
            let mut updated = original;
            updated.status = status;
            self.client.update_task_status(updated).await?;
        }

        Ok(outcome)
    }

    async fn next_status(&self, task: &Task) -> Result<(TaskStatus, ReconcileOutcome)> {
        let unchanged = || (task.status.clone(), ReconcileOutcome::Synced);

        match task.phase() {
            Phase::Unset => Ok((
                TaskStatus {
                    phase: Phase::Pending,
                },
                ReconcileOutcome::Synced,
            )),
            Phase::Pending => self.evaluate_schedule(task),
            Phase::Running => self.observe_job(task).await,
            Phase::Done => {
                debug!(key = %task.key(), "Task already done");
                Ok(unchanged())
            }
            Phase::Unknown(phase) => {
                info!(key = %task.key(), %phase, "Unrecognised phase, nothing to do");
                Ok(unchanged())
            }
        }
    }

    fn evaluate_schedule(&self, task: &Task) -> Result<(TaskStatus, ReconcileOutcome)> {
        let key = task.key();
        let wait = match time_until_schedule(&task.spec.schedule, self.clock.now()) {
            Ok(wait) => wait,
            Err(e) => {
                self.recorder
                    .warning(task.object_reference(), "InvalidSchedule", e.to_string());
                return Err(e);
            }
        };

        if wait > chrono::TimeDelta::zero() {
            let delay = wait
                .to_std()
                .map_err(|e| Error::invalid_schedule(&task.spec.schedule, e.to_string()))?;
            info!(key = %key, schedule = %task.spec.schedule, ?delay, "Not ready to execute yet");
            return Ok((task.status.clone(), ReconcileOutcome::RequeueAfter(delay)));
        }

        info!(key = %key, schedule = %task.spec.schedule, "Ready to execute");
        self.recorder.normal(
            task.object_reference(),
            "Executing",
            format!("Schedule {} reached, executing", task.spec.schedule),
        );
        Ok((
            TaskStatus {
                phase: Phase::Running,
            },
            ReconcileOutcome::Synced,
        ))
    }

    async fn observe_job(&self, task: &Task) -> Result<(TaskStatus, ReconcileOutcome)> {
        let key = task.key();
        let job_name = format!("{}{JOB_NAME_SUFFIX}", task.metadata.name);

        match self.client.get_job(&task.metadata.namespace, &job_name).await {
            Err(e) if e.is_not_found() => {
                let job = new_job_for_task(task, &self.config);
                let created = self.client.create_job(job).await?;
                info!(key = %key, job = %created.key(), "Job created");
                self.recorder.normal(
                    task.object_reference(),
                    "JobCreated",
                    format!("Created job {}", created.metadata.name),
                );
                Ok((task.status.clone(), ReconcileOutcome::Synced))
            }
            Err(e) => Err(e.into()),
            Ok(job) if job.is_finished() => {
                info!(key = %key, job = %job.key(), phase = %job.status.phase, "Job finished");
                self.recorder.normal(
                    task.object_reference(),
                    "Completed",
                    format!(
                        "Job {} finished with phase {}",
                        job.metadata.name, job.status.phase
                    ),
                );
                Ok((
                    TaskStatus {
                        phase: Phase::Done,
                    },
                    ReconcileOutcome::Synced,
                ))
            }
            Ok(job) => {
                debug!(key = %key, job = %job.key(), phase = %job.status.phase, "Job still running");
                Ok((task.status.clone(), ReconcileOutcome::Synced))
            }
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    cache: Option<Arc<dyn ObjectCache>>,
    client: Option<Arc<dyn ClusterClient>>,
    recorder: Option<EventRecorder>,
    clock: Option<Arc<dyn Clock>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            cache: None,
            client: None,
            recorder: None,
            clock: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the object cache.
    pub fn with_cache(mut self, cache: Arc<dyn ObjectCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the cluster client.
    pub fn with_client(mut self, client: Arc<dyn ClusterClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the event recorder.
    pub fn with_recorder(mut self, recorder: EventRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Set the clock. Defaults to the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the Job container image.
    pub fn job_image(mut self, image: impl Into<String>) -> Self {
        self.config.job_image = image.into();
        self
    }

    /// Build the reconciler.
    pub fn build(self) -> Result<Reconciler> {
        let cache = self
            .cache
            .ok_or_else(|| Error::invalid_config("Object cache is required"))?;
        let client = self
            .client
            .ok_or_else(|| Error::invalid_config("Cluster client is required"))?;
        let recorder = self
            .recorder
            .ok_or_else(|| Error::invalid_config("Event recorder is required"))?;
        if self.config.job_image.is_empty() {
            return Err(Error::invalid_config("Job image must not be empty"));
        }
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        Ok(Reconciler::new(cache, client, recorder, clock, self.config))
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::time::Duration;

    use chrono::{Local, TimeDelta};
    use cnat_events::{EventType, InMemoryCluster, JobPhase, Operation, StoreError};

    use super::*;
    use crate::recorder::EventBroadcaster;
    use crate::schedule::{FixedClock, SCHEDULE_FORMAT};

    struct Harness {
        cluster: Arc<InMemoryCluster>,
        clock: Arc<FixedClock>,
        broadcaster: EventBroadcaster,
        reconciler: Reconciler,
    }

    fn harness() -> Harness {
        let cluster = InMemoryCluster::new_arc();
        let clock = Arc::new(FixedClock::new(Local::now()));
        let broadcaster = EventBroadcaster::start(cluster.clone());
        let reconciler = ReconcilerBuilder::new()
            .with_cache(cluster.clone())
            .with_client(cluster.clone())
            .with_recorder(broadcaster.new_recorder(CONTROLLER_NAME))
            .with_clock(clock.clone())
            .build()
            .unwrap();
        Harness {
            cluster,
            clock,
            broadcaster,
            reconciler,
        }
    }

    fn schedule_in(clock: &FixedClock, offset: TimeDelta) -> String {
        (clock.now() + offset).format(SCHEDULE_FORMAT).to_string()
    }

    fn stored_phase(cluster: &InMemoryCluster, name: &str) -> Phase {
        cluster.get_task("default", name).unwrap().status.phase
    }

    #[tokio::test]
    async fn test_unset_becomes_pending_without_side_effects() {
        let h = harness();
        h.cluster
            .apply_task(Task::new("default", "backup", "2099-01-01 00:00:00", "echo hi"))
            .unwrap();

        let outcome = h.reconciler.reconcile("default/backup").await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Synced);
        assert_eq!(stored_phase(&h.cluster, "backup"), Phase::Pending);
        assert!(h.cluster.list_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_future_schedule_requeues_with_remaining_time() {
        // GIVEN: a pending task due in 90 seconds
        let h = harness();
        let schedule = schedule_in(&h.clock, TimeDelta::seconds(90));
        let task = h
            .cluster
            .apply_task(Task::new("default", "backup", schedule, "echo hi"))
            .unwrap();
        h.cluster
            .update_task_status(task.with_phase(Phase::Pending))
            .await
            .unwrap();

        // WHEN: reconciled
        let outcome = h.reconciler.reconcile("default/backup").await.unwrap();

        // THEN: requeued for the remaining time, status untouched
        let delay = outcome.requeue_after().unwrap();
        assert!(delay > Duration::from_secs(88) && delay <= Duration::from_secs(90));
        assert_eq!(stored_phase(&h.cluster, "backup"), Phase::Pending);
    }

    #[tokio::test]
    async fn test_due_schedule_moves_to_running_then_creates_job() {
        let h = harness();
        let schedule = schedule_in(&h.clock, TimeDelta::seconds(-5));
        let task = h
            .cluster
            .apply_task(Task::new("default", "backup", schedule, "echo  hello world"))
            .unwrap();
        h.cluster
            .update_task_status(task.with_phase(Phase::Pending))
            .await
            .unwrap();

        // First pass: only the phase changes.
        h.reconciler.reconcile("default/backup").await.unwrap();
        assert_eq!(stored_phase(&h.cluster, "backup"), Phase::Running);
        assert!(h.cluster.list_jobs().is_empty());

        // Second pass: the job appears.
        h.reconciler.reconcile("default/backup").await.unwrap();
        let jobs = h.cluster.list_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].metadata.name, "backup-job");
        assert_eq!(jobs[0].command(), ["echo", "hello", "world"]);
        assert_eq!(stored_phase(&h.cluster, "backup"), Phase::Running);
    }

    #[tokio::test]
    async fn test_running_with_live_job_is_a_no_op() {
        let h = harness();
        let task = h
            .cluster
            .apply_task(Task::new("default", "backup", "2000-01-01 00:00:00", "sleep 5"))
            .unwrap();
        let task = h
            .cluster
            .update_task_status(task.with_phase(Phase::Running))
            .await
            .unwrap();
        h.cluster
            .create_job(new_job_for_task(&task, &ReconcilerConfig::default()))
            .await
            .unwrap();

        h.reconciler.reconcile("default/backup").await.unwrap();

        assert_eq!(h.cluster.list_jobs().len(), 1);
        assert_eq!(stored_phase(&h.cluster, "backup"), Phase::Running);
    }

    #[tokio::test]
    async fn test_finished_job_moves_task_to_done() {
        let h = harness();
        let task = h
            .cluster
            .apply_task(Task::new("default", "backup", "2000-01-01 00:00:00", "true"))
            .unwrap();
        let task = h
            .cluster
            .update_task_status(task.with_phase(Phase::Running))
            .await
            .unwrap();
        h.cluster
            .create_job(new_job_for_task(&task, &ReconcilerConfig::default()))
            .await
            .unwrap();
        h.cluster
            .set_job_phase("default", "backup-job", JobPhase::Failed, None, None)
            .unwrap();

        h.reconciler.reconcile("default/backup").await.unwrap();
        assert_eq!(stored_phase(&h.cluster, "backup"), Phase::Done);

        // Done is terminal.
        h.reconciler.reconcile("default/backup").await.unwrap();
        assert_eq!(stored_phase(&h.cluster, "backup"), Phase::Done);
    }

    #[tokio::test]
    async fn test_missing_task_and_bad_key_are_synced() {
        let h = harness();
        let before = cnat_core::reported_errors();

        assert_eq!(
            h.reconciler.reconcile("default/ghost").await.unwrap(),
            ReconcileOutcome::Synced
        );
        assert_eq!(
            h.reconciler.reconcile("a/b/c").await.unwrap(),
            ReconcileOutcome::Synced
        );
        assert!(cnat_core::reported_errors() >= before + 2);
    }

    #[tokio::test]
    async fn test_invalid_schedule_is_retryable_and_recorded() {
        let h = harness();
        let task = h
            .cluster
            .apply_task(Task::new("default", "backup", "whenever", "echo hi"))
            .unwrap();
        h.cluster
            .update_task_status(task.with_phase(Phase::Pending))
            .await
            .unwrap();

        let result = h.reconciler.reconcile("default/backup").await;
        assert!(matches!(result, Err(Error::InvalidSchedule { .. })));
        assert_eq!(stored_phase(&h.cluster, "backup"), Phase::Pending);

        h.broadcaster.shutdown().await;
        let events = h.cluster.events();
        assert!(events
            .iter()
            .any(|e| e.reason == "InvalidSchedule" && e.event_type == EventType::Warning));
    }

    #[tokio::test]
    async fn test_store_failures_propagate() {
        let h = harness();
        let task = h
            .cluster
            .apply_task(Task::new("default", "backup", "2000-01-01 00:00:00", "true"))
            .unwrap();
        h.cluster
            .update_task_status(task.with_phase(Phase::Running))
            .await
            .unwrap();
        h.cluster
            .inject_fault(Operation::CreateJob, StoreError::unavailable("api down"));

        let result = h.reconciler.reconcile("default/backup").await;
        assert!(matches!(result, Err(Error::Store(_))));
        assert!(h.cluster.list_jobs().is_empty());

        // The next pass succeeds.
        h.reconciler.reconcile("default/backup").await.unwrap();
        assert_eq!(h.cluster.list_jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_job_carries_owner_and_label() {
        let h = harness();
        let task = h
            .cluster
            .apply_task(Task::new("default", "backup", "2000-01-01 00:00:00", "true"))
            .unwrap();

        let job = new_job_for_task(&task, h.reconciler.config());

        assert_eq!(job.metadata.labels.get("app"), Some(&"backup".to_string()));
        let owner = job.metadata.controller_of().unwrap();
        assert_eq!(owner.uid, task.metadata.uid);
        assert_eq!(job.spec.containers[0].image, "busybox");
        assert_eq!(job.spec.restart_policy, RestartPolicy::OnFailure);
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let result = ReconcilerBuilder::new().build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }
}
