//! Change notifications delivered by the watch layer.

use serde::{Deserialize, Serialize};

use crate::types::{Job, Task, JOB_KIND, TASK_KIND};

/// A stored object of either kind the controller watches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Object {
    Task(Task),
    Job(Job),
}

impl Object {
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Task(task) => task.key(),
            Self::Job(job) => job.key(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Task(_) => TASK_KIND,
            Self::Job(_) => JOB_KIND,
        }
    }
}

/// Placeholder for an object that was removed before its deletion was
/// observed directly.
///
/// `object` carries the last known value. It is `None` when the watch layer
/// could not recover it, which the router treats as a malformed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub key: String,
    pub object: Option<Object>,
}

impl Tombstone {
    /// Wrap the last known value of a removed object.
    #[must_use]
    pub fn of(object: Object) -> Self {
        Self {
            key: object.key(),
            object: Some(object),
        }
    }
}

/// A change observed in the cluster store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    /// A Task was added or updated.
    TaskChanged(Task),
    /// A Job was added or updated.
    JobChanged(Job),
    /// An object was removed; carries its prior value.
    Removed(Tombstone),
}

impl Notification {
    /// Short name for logging.
    #[must_use]
    pub const fn notification_type(&self) -> &'static str {
        match self {
            Self::TaskChanged(_) => "task_changed",
            Self::JobChanged(_) => "job_changed",
            Self::Removed(_) => "removed",
        }
    }

    /// Key of the object the notification is about.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::TaskChanged(task) => task.key(),
            Self::JobChanged(job) => job.key(),
            Self::Removed(tombstone) => tombstone.key.clone(),
        }
    }
}
