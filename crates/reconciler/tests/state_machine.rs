//! Behavioural tests for the Task state machine.
//!
//! Each test drives single reconcile passes against an in-memory cluster
//! and observes the writes a pass issues:
//! - unset tasks are normalised without side effects
//! - pending tasks wait exactly as long as their schedule says
//! - due tasks run in two passes: phase first, job second
//! - repeated passes never duplicate jobs or status writes
//!
//! # Quality Standards
//! - Zero unwraps in tests
//! - Frozen clock for schedule arithmetic

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, TimeDelta};
use cnat_events::{
    ClusterClient, InMemoryCluster, Job, JobPhase, ObjectCache, Operation, Phase, StoreError,
    StoreResult, Task,
};
use cnat_reconciler::{
    Clock, Error, EventBroadcaster, FixedClock, Reconciler, ReconcileOutcome, ReconcilerBuilder,
    SCHEDULE_FORMAT,
};
use proptest::prelude::*;

/// Cluster client counting the writes passed through to the cluster.
struct CountingClient {
    inner: Arc<InMemoryCluster>,
    creates: AtomicUsize,
    status_writes: AtomicUsize,
    /// Answer the next `get_job` with NotFound, like a lagging cache.
    hide_next_job: AtomicBool,
}

impl CountingClient {
    fn writes(&self) -> usize {
        self.creates.load(Ordering::SeqCst) + self.status_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterClient for CountingClient {
    async fn get_job(&self, namespace: &str, name: &str) -> StoreResult<Job> {
        if self.hide_next_job.swap(false, Ordering::SeqCst) {
            return Err(StoreError::not_found("Job", format!("{namespace}/{name}")));
        }
        self.inner.get_job(namespace, name).await
    }

    async fn create_job(&self, job: Job) -> StoreResult<Job> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_job(job).await
    }

    async fn update_task_status(&self, task: Task) -> StoreResult<Task> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_task_status(task).await
    }
}

struct Fixture {
    cluster: Arc<InMemoryCluster>,
    client: Arc<CountingClient>,
    clock: Arc<FixedClock>,
    broadcaster: EventBroadcaster,
    reconciler: Reconciler,
}

fn fixture() -> Result<Fixture, String> {
    let cluster = InMemoryCluster::new_arc();
    let client = Arc::new(CountingClient {
        inner: cluster.clone(),
        creates: AtomicUsize::new(0),
        status_writes: AtomicUsize::new(0),
        hide_next_job: AtomicBool::new(false),
    });
    let clock = Arc::new(FixedClock::new(Local::now()));
    let broadcaster = EventBroadcaster::start(cluster.clone());
    let reconciler = ReconcilerBuilder::new()
        .with_cache(cluster.clone())
        .with_client(client.clone())
        .with_recorder(broadcaster.new_recorder("cnat-controller"))
        .with_clock(clock.clone())
        .build()
        .map_err(|e| format!("failed to build reconciler: {e}"))?;
    Ok(Fixture {
        cluster,
        client,
        clock,
        broadcaster,
        reconciler,
    })
}

impl Fixture {
    /// Store a task and force its phase, bypassing the counting client.
    async fn seed(&self, name: &str, schedule: &str, command: &str, phase: Phase) -> Result<(), String> {
        let task = self
            .cluster
            .apply_task(Task::new("default", name, schedule, command))
            .map_err(|e| format!("apply failed: {e}"))?;
        if phase != Phase::Unset {
            self.cluster
                .update_task_status(task.with_phase(phase))
                .await
                .map_err(|e| format!("status seed failed: {e}"))?;
        }
        Ok(())
    }

    async fn pass(&self, name: &str) -> Result<ReconcileOutcome, String> {
        self.reconciler
            .reconcile(&format!("default/{name}"))
            .await
            .map_err(|e| format!("reconcile failed: {e}"))
    }

    fn phase(&self, name: &str) -> Result<Phase, String> {
        self.cluster
            .get_task("default", name)
            .map(|t| t.status.phase)
            .map_err(|e| format!("task lookup failed: {e}"))
    }

    fn schedule_in(&self, offset: TimeDelta) -> String {
        (self.clock.now() + offset).format(SCHEDULE_FORMAT).to_string()
    }
}

/// GIVEN: a task with no phase
/// WHEN: reconciled once
/// THEN: it is Pending and no job exists
#[tokio::test]
async fn unset_task_becomes_pending_without_side_effects() -> Result<(), String> {
    let f = fixture()?;
    f.seed("backup", "2000-01-01 00:00:00", "echo hi", Phase::Unset).await?;

    let outcome = f.pass("backup").await?;

    assert_eq!(outcome, ReconcileOutcome::Synced);
    assert_eq!(f.phase("backup")?, Phase::Pending);
    assert_eq!(f.client.creates.load(Ordering::SeqCst), 0);
    assert!(f.cluster.list_jobs().is_empty());
    Ok(())
}

/// GIVEN: `schedule = now - 1s, command = "echo hi"`
/// WHEN: reconciled twice
/// THEN: the first pass sets Running, the second creates exactly one job
#[tokio::test]
async fn due_task_runs_in_two_passes() -> Result<(), String> {
    let f = fixture()?;
    let schedule = f.schedule_in(TimeDelta::seconds(-1));
    f.seed("backup", &schedule, "echo hi", Phase::Pending).await?;

    f.pass("backup").await?;
    assert_eq!(f.phase("backup")?, Phase::Running);
    assert!(f.cluster.list_jobs().is_empty());

    f.pass("backup").await?;
    let jobs = f.cluster.list_jobs();
    assert_eq!(jobs.len(), 1);
    let argv = jobs.first().map(Job::command).unwrap_or_default();
    assert_eq!(argv, ["echo", "hi"]);
    Ok(())
}

/// GIVEN: a task scheduled for 2099
/// WHEN: reconciled repeatedly
/// THEN: it stays Pending and no job is ever created
#[tokio::test]
async fn far_future_task_stays_pending() -> Result<(), String> {
    let f = fixture()?;
    f.seed("later", "2099-01-01 00:00:00", "echo hi", Phase::Pending).await?;

    for _ in 0..3 {
        let outcome = f.pass("later").await?;
        assert!(matches!(outcome, ReconcileOutcome::RequeueAfter(_)));
    }

    assert_eq!(f.phase("later")?, Phase::Pending);
    assert_eq!(f.client.writes(), 0);
    assert!(f.cluster.list_jobs().is_empty());
    Ok(())
}

/// GIVEN: a Running task whose job exists and is still running
/// WHEN: reconciled twice more
/// THEN: no duplicate job and no status write
#[tokio::test]
async fn running_task_with_live_job_is_idempotent() -> Result<(), String> {
    let f = fixture()?;
    f.seed("backup", "2000-01-01 00:00:00", "sleep 60", Phase::Running).await?;
    f.pass("backup").await?;
    f.cluster
        .set_job_phase("default", "backup-job", JobPhase::Running, None, None)
        .map_err(|e| format!("job phase failed: {e}"))?;
    let writes_after_create = f.client.writes();

    f.pass("backup").await?;
    f.pass("backup").await?;

    assert_eq!(f.cluster.list_jobs().len(), 1);
    assert_eq!(f.client.writes(), writes_after_create);
    assert_eq!(f.phase("backup")?, Phase::Running);
    Ok(())
}

/// GIVEN: a Running task whose job succeeded
/// WHEN: reconciled several times
/// THEN: exactly one status write moves it to Done
#[tokio::test]
async fn finished_job_completes_task_exactly_once() -> Result<(), String> {
    let f = fixture()?;
    f.seed("backup", "2000-01-01 00:00:00", "true", Phase::Running).await?;
    f.pass("backup").await?;
    f.cluster
        .set_job_phase(
            "default",
            "backup-job",
            JobPhase::Succeeded,
            Some("Completed".into()),
            None,
        )
        .map_err(|e| format!("job phase failed: {e}"))?;
    let before = f.client.status_writes.load(Ordering::SeqCst);

    for _ in 0..3 {
        f.pass("backup").await?;
    }

    assert_eq!(f.phase("backup")?, Phase::Done);
    assert_eq!(f.client.status_writes.load(Ordering::SeqCst), before + 1);
    assert_eq!(f.cluster.list_jobs().len(), 1);

    f.broadcaster.shutdown().await;
    let reasons: Vec<String> = f.cluster.events().into_iter().map(|e| e.reason).collect();
    assert_eq!(reasons, ["JobCreated", "Completed"]);
    Ok(())
}

/// GIVEN: a finished task whose job was deleted afterwards
/// WHEN: reconciled
/// THEN: nothing is recreated
#[tokio::test]
async fn done_task_never_recreates_its_job() -> Result<(), String> {
    let f = fixture()?;
    f.seed("backup", "2000-01-01 00:00:00", "true", Phase::Done).await?;

    f.pass("backup").await?;

    assert!(f.cluster.list_jobs().is_empty());
    assert_eq!(f.client.writes(), 0);
    Ok(())
}

/// GIVEN: a Running task whose job exists but the next lookup misses it
/// WHEN: reconciled twice
/// THEN: the duplicate create fails retryably and the retry finds the job
#[tokio::test]
async fn duplicate_job_create_is_retried_and_resolved() -> Result<(), String> {
    let f = fixture()?;
    f.seed("backup", "2000-01-01 00:00:00", "sleep 60", Phase::Running).await?;
    f.pass("backup").await?;
    assert_eq!(f.cluster.list_jobs().len(), 1);
    f.client.hide_next_job.store(true, Ordering::SeqCst);

    let first = f.reconciler.reconcile("default/backup").await;
    assert!(
        matches!(first, Err(Error::Store(ref e)) if e.is_already_exists()),
        "expected AlreadyExists, got {first:?}"
    );

    let second = f.pass("backup").await?;
    assert_eq!(second, ReconcileOutcome::Synced);
    assert_eq!(f.cluster.list_jobs().len(), 1);
    assert_eq!(f.phase("backup")?, Phase::Running);
    Ok(())
}

/// GIVEN: a task whose first status write hits a version conflict
/// WHEN: reconciled twice
/// THEN: the first pass fails retryably and the second applies the write
#[tokio::test]
async fn status_write_conflict_is_retried() -> Result<(), String> {
    let f = fixture()?;
    f.seed("backup", "2099-01-01 00:00:00", "echo hi", Phase::Unset).await?;
    f.cluster.inject_fault(
        Operation::UpdateTaskStatus,
        StoreError::conflict("Task", "default/backup"),
    );

    let first = f.reconciler.reconcile("default/backup").await;
    assert!(
        matches!(first, Err(Error::Store(ref e)) if e.is_conflict()),
        "expected Conflict, got {first:?}"
    );
    assert_eq!(f.phase("backup")?, Phase::Unset);

    let second = f.pass("backup").await?;
    assert_eq!(second, ReconcileOutcome::Synced);
    assert_eq!(f.phase("backup")?, Phase::Pending);
    assert_eq!(f.client.status_writes.load(Ordering::SeqCst), 2);
    Ok(())
}

/// GIVEN: a task carrying a phase the controller does not know
/// WHEN: reconciled repeatedly
/// THEN: nothing is written and the phase is kept verbatim
#[tokio::test]
async fn unrecognised_phase_is_left_alone() -> Result<(), String> {
    let f = fixture()?;
    let paused = Phase::Unknown("PAUSED".to_string());
    f.seed("backup", "2000-01-01 00:00:00", "echo hi", paused.clone()).await?;

    for _ in 0..2 {
        assert_eq!(f.pass("backup").await?, ReconcileOutcome::Synced);
    }

    assert_eq!(f.phase("backup")?, paused);
    assert_eq!(f.client.writes(), 0);
    assert!(f.cluster.list_jobs().is_empty());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A pending task due in `delta` seconds is requeued for `delta`.
    #[test]
    fn pending_requeue_matches_schedule(delta in 1i64..=86_400) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let (phase, outcome, jobs) = runtime
            .block_on(async {
                let f = fixture()?;
                let schedule = f.schedule_in(TimeDelta::seconds(delta));
                f.seed("backup", &schedule, "echo hi", Phase::Pending).await?;
                let outcome = f.pass("backup").await?;
                Ok::<_, String>((f.phase("backup")?, outcome, f.cluster.list_jobs().len()))
            })
            .map_err(TestCaseError::fail)?;

        prop_assert_eq!(phase, Phase::Pending);
        prop_assert_eq!(jobs, 0);
        let delay = outcome
            .requeue_after()
            .ok_or_else(|| TestCaseError::fail("expected a requeue"))?;
        let expected = Duration::from_secs(delta.unsigned_abs());
        prop_assert!(delay <= expected);
        prop_assert!(expected - delay < Duration::from_secs(1));
    }

    /// Tasks that are due never skip Running, whatever their command.
    #[test]
    fn due_task_always_passes_through_running(command in "[a-z]{1,8}( [a-z0-9]{1,8}){0,3}") {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let (first, argv) = runtime
            .block_on(async {
                let f = fixture()?;
                f.seed("backup", "2000-01-01 00:00:00", &command, Phase::Pending).await?;
                f.pass("backup").await?;
                let first = f.phase("backup")?;
                f.pass("backup").await?;
                let argv = f
                    .cluster
                    .list_jobs()
                    .first()
                    .map(|job| job.command().to_vec())
                    .unwrap_or_default();
                Ok::<_, String>((first, argv))
            })
            .map_err(TestCaseError::fail)?;

        prop_assert_eq!(first, Phase::Running);
        let expected: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        prop_assert_eq!(argv, expected);
    }
}
