//! Error types for the reconciler crate.

use std::time::Duration;

use cnat_events::StoreError;
use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
///
/// Every error a reconcile pass returns is retried with backoff; outcomes
/// that must not be retried (missing task, malformed key) are reported and
/// turned into success before they get here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid schedule {schedule:?}: {reason}")]
    InvalidSchedule { schedule: String, reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("timed out after {timeout:?} waiting for caches to sync")]
    CacheSyncTimeout { timeout: Duration },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create an invalid schedule error.
    pub fn invalid_schedule(schedule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            schedule: schedule.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
