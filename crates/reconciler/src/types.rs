//! Core types for the reconciler.

use std::fmt;
use std::time::Duration;

use cnat_events::{Phase, TaskStatus};

/// What the worker should do with a key after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing further is scheduled. Backoff history is cleared.
    Synced,
    /// Reconcile again once the delay has elapsed.
    RequeueAfter(Duration),
}

impl ReconcileOutcome {
    #[must_use]
    pub const fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::Synced => None,
            Self::RequeueAfter(delay) => Some(*delay),
        }
    }
}

/// Difference between the observed and the computed status of a Task.
///
/// Computed once per pass. A status write happens only when one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusDiff {
    pub phase: Option<(Phase, Phase)>,
}

impl StatusDiff {
    /// Compare two status snapshots. `None` when they are equal.
    #[must_use]
    pub fn between(before: &TaskStatus, after: &TaskStatus) -> Option<Self> {
        if before == after {
            return None;
        }
        let phase = (before.phase != after.phase)
            .then(|| (before.phase.clone(), after.phase.clone()));
        Some(Self { phase })
    }

    /// Whether every changed field moves forward.
    #[must_use]
    pub fn is_forward(&self) -> bool {
        self.phase
            .as_ref()
            .is_none_or(|(from, to)| from.can_transition_to(to))
    }
}

impl fmt::Display for StatusDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.phase {
            Some((from, to)) => write!(f, "phase {from} -> {to}"),
            None => write!(f, "no field changes"),
        }
    }
}
