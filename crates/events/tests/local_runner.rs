//! Local job execution against the in-memory cluster.
//!
//! The runner watches Job creations and moves each Job through
//! `Pending -> Running -> Succeeded | Failed` according to the exit status
//! of its command:
//! - exit 0 succeeds with reason `Completed`
//! - non-zero exit fails with reason `Error`
//! - a program that cannot be spawned fails with reason `StartError`
//!
//! # Quality Standards
//! - Zero unwraps in tests
//! - Bounded polling

use std::sync::Arc;
use std::time::Duration;

use cnat_events::{
    ClusterClient, Container, InMemoryCluster, Job, JobPhase, JobSpec, LocalJobRunner,
    ObjectMeta,
};
use tokio::sync::oneshot;

fn job(name: &str, argv: &[&str]) -> Job {
    Job {
        metadata: ObjectMeta::new("default", name),
        spec: JobSpec {
            containers: vec![Container {
                name: "busybox".to_string(),
                image: "busybox".to_string(),
                command: argv.iter().map(ToString::to_string).collect(),
            }],
            ..JobSpec::default()
        },
        ..Job::default()
    }
}

async fn finished(cluster: &InMemoryCluster, name: &str) -> Result<Job, String> {
    for _ in 0..500 {
        let current = cluster
            .get_job("default", name)
            .await
            .map_err(|e| e.to_string())?;
        if current.is_finished() {
            return Ok(current);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(format!("job {name} never finished"))
}

/// GIVEN: a running job runner
/// WHEN: jobs with succeeding, failing and unspawnable commands are created
/// THEN: each ends in the phase and reason matching its exit
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn jobs_finish_according_to_exit_status() -> Result<(), String> {
    let cluster = InMemoryCluster::new_arc();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(LocalJobRunner::new(Arc::clone(&cluster)).run(async {
        let _ = stop_rx.await;
    }));
    while cluster.bus().subscriber_count() == 0 {
        tokio::task::yield_now().await;
    }

    for (name, argv) in [
        ("ok", vec!["true"]),
        ("fails", vec!["false"]),
        ("missing", vec!["/nonexistent/cnat-no-such-binary", "--flag"]),
    ] {
        cluster
            .create_job(job(name, &argv))
            .await
            .map_err(|e| e.to_string())?;
    }

    let ok = finished(&cluster, "ok").await?;
    let fails = finished(&cluster, "fails").await?;
    let missing = finished(&cluster, "missing").await?;

    let _ = stop_tx.send(());
    handle.await.map_err(|e| e.to_string())?;

    assert_eq!(ok.status.phase, JobPhase::Succeeded);
    assert_eq!(ok.status.reason.as_deref(), Some("Completed"));
    assert_eq!(fails.status.phase, JobPhase::Failed);
    assert_eq!(fails.status.reason.as_deref(), Some("Error"));
    assert_eq!(missing.status.phase, JobPhase::Failed);
    assert_eq!(missing.status.reason.as_deref(), Some("StartError"));
    Ok(())
}
