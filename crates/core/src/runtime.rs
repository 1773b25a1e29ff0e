//! Process-wide error reporter.
//!
//! Errors that cannot be returned to anyone (a malformed notification, a key
//! that cannot be split) are handed here instead of being silently dropped.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};

static REPORTED: AtomicU64 = AtomicU64::new(0);

/// Report an error that has no caller to propagate to.
pub fn handle_error(err: &dyn Display) {
    REPORTED.fetch_add(1, Ordering::Relaxed);
    tracing::error!(error = %err, "unhandled error");
}

/// Total number of errors reported since process start.
#[must_use]
pub fn reported_errors() -> u64 {
    REPORTED.load(Ordering::Relaxed)
}
