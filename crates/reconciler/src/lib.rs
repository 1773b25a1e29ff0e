//! Level-triggered reconciliation of scheduled tasks.
//!
//! A Task declares a wall-clock time and a command. This crate drives it
//! through `unset -> Pending -> Running -> Done`:
//!
//! - **Schedule**: how long until a task is due
//! - **Router**: maps Task/Job notifications onto Task keys in the work queue
//! - **Reconciler**: recomputes the desired phase from current observations
//!   and performs at most one side effect per pass
//! - **Workers**: drain the queue and do retry/backoff bookkeeping
//! - **Controller**: wires the above together behind a cache-sync gate
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cnat_events::InMemoryCluster;
//! use cnat_reconciler::{Controller, ControllerConfig, EventBroadcaster, SystemClock};
//!
//! #[tokio::main]
//! async fn main() {
//!     let cluster = InMemoryCluster::new_arc();
//!     let broadcaster = EventBroadcaster::start(cluster.clone());
//!     let controller = Controller::new(
//!         ControllerConfig::default(),
//!         cluster.clone(),
//!         cluster.clone(),
//!         broadcaster.new_recorder("cnat-controller"),
//!         Arc::new(SystemClock),
//!     );
//!
//!     let subscription = cluster.subscribe();
//!     controller
//!         .run(subscription, async { let _ = tokio::signal::ctrl_c().await; })
//!         .await
//!         .ok();
//!     broadcaster.shutdown().await;
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod controller;
pub mod error;
pub mod recorder;
pub mod reconciler;
pub mod router;
pub mod schedule;
pub mod types;
pub mod worker;

// Re-export main types
pub use controller::{Controller, ControllerConfig};
pub use error::{Error, Result};
pub use recorder::{EventBroadcaster, EventRecorder};
pub use reconciler::{
    new_job_for_task, Reconciler, ReconcilerBuilder, ReconcilerConfig, CONTROLLER_NAME,
    JOB_NAME_SUFFIX,
};
pub use router::EventRouter;
pub use schedule::{time_until_schedule, Clock, FixedClock, SystemClock, SCHEDULE_FORMAT};
pub use types::{ReconcileOutcome, StatusDiff};
pub use worker::WorkerPool;
