//! Local execution of Jobs created on the in-memory cluster.
//!
//! Stands in for the cluster runtime: every newly created Job has its argv
//! spawned as a child process, and the Job is moved through
//! `running -> succeeded | failed`. Output is discarded.

use std::collections::HashSet;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::SubscriptionError;
use crate::event::Notification;
use crate::store::InMemoryCluster;
use crate::types::{Job, JobPhase};

/// Runs Job commands as local processes.
pub struct LocalJobRunner {
    cluster: Arc<InMemoryCluster>,
}

impl LocalJobRunner {
    #[must_use]
    pub const fn new(cluster: Arc<InMemoryCluster>) -> Self {
        Self { cluster }
    }

    /// Watch for new Jobs until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut sub = self.cluster.subscribe();
        let mut started: HashSet<String> = HashSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    debug!("Local job runner stopping");
                    return;
                }
                received = sub.recv() => match received {
                    Ok(Notification::JobChanged(job)) => self.start_if_pending(&mut started, job),
                    Ok(_) => {}
                    Err(SubscriptionError::Lagged(skipped)) => {
                        warn!(skipped, "Local job runner lagged, rescanning jobs");
                        for job in self.cluster.list_jobs() {
                            self.start_if_pending(&mut started, job);
                        }
                    }
                    Err(SubscriptionError::Closed) => return,
                },
            }
        }
    }

    fn start_if_pending(&self, started: &mut HashSet<String>, job: Job) {
        if job.status.phase == JobPhase::Pending && started.insert(job.metadata.uid.clone()) {
            tokio::spawn(execute(Arc::clone(&self.cluster), job));
        }
    }
}

async fn execute(cluster: Arc<InMemoryCluster>, job: Job) {
    let namespace = job.metadata.namespace.clone();
    let name = job.metadata.name.clone();
    let Some((program, args)) = job.command().split_first() else {
        let _ = cluster.set_job_phase(
            &namespace,
            &name,
            JobPhase::Failed,
            Some("InvalidCommand".to_string()),
            Some("empty command".to_string()),
        );
        return;
    };

    if cluster
        .set_job_phase(&namespace, &name, JobPhase::Running, None, None)
        .is_err()
    {
        // Removed before it started.
        return;
    }
    info!(job = %job.key(), program = %program, "Executing job");

    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    let (phase, reason, message) = match status {
        Ok(status) if status.success() => (JobPhase::Succeeded, "Completed", status.to_string()),
        Ok(status) => (JobPhase::Failed, "Error", status.to_string()),
        Err(e) => (JobPhase::Failed, "StartError", e.to_string()),
    };
    info!(job = %job.key(), phase = %phase, message = %message, "Job finished");
    let _ = cluster.set_job_phase(
        &namespace,
        &name,
        phase,
        Some(reason.to_string()),
        Some(message),
    );
}
