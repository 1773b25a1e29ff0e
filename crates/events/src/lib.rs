//! Resource model and change notifications for the cnat controller.
//!
//! This crate holds everything the controller consumes from the cluster:
//!
//! - **Types**: `Task` (declared schedule + command) and `Job` (execution unit)
//! - **Notifications**: the `Notification` tagged union delivered on change
//! - **Bus**: broadcast fan-out of notifications to subscribers
//! - **Store**: the `ClusterClient` / `ObjectCache` / `EventSink` seams and an
//!   in-memory cluster implementing all three
//!
//! # Example
//!
//! ```ignore
//! use cnat_events::{InMemoryCluster, Task};
//!
//! #[tokio::main]
//! async fn main() {
//!     let cluster = InMemoryCluster::new_arc();
//!     let mut sub = cluster.subscribe();
//!
//!     cluster
//!         .apply_task(Task::new("default", "backup", "2099-01-01 00:00:00", "echo hi"))
//!         .ok();
//!
//!     let notification = sub.recv().await;
//!     println!("Received: {notification:?}");
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod bus;
pub mod error;
pub mod event;
pub mod manifest;
pub mod runner;
pub mod store;
pub mod types;

// Re-export main types
pub use bus::{NotificationBus, NotificationSubscription};
pub use error::{StoreError, StoreResult, SubscriptionError};
pub use event::{Notification, Object, Tombstone};
pub use manifest::{load_tasks, parse_tasks};
pub use runner::LocalJobRunner;
pub use store::{ClusterClient, EventSink, InMemoryCluster, ObjectCache, Operation};
pub use types::{
    ClusterEvent, Container, EventType, Job, JobPhase, JobSpec, JobStatus, ObjectMeta,
    ObjectReference, OwnerReference, Phase, RestartPolicy, Task, TaskSpec, TaskStatus,
    API_VERSION, JOB_KIND, TASK_KIND,
};
