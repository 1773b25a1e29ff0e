//! Schedule evaluation.

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, TimeZone};
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Layout of `spec.schedule`: local date and time, second precision.
pub const SCHEDULE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Source of the current local time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Local>>,
}

impl FixedClock {
    #[must_use]
    pub const fn new(now: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Local>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock()
    }
}

/// Signed time from `now` until `schedule`.
///
/// Zero or negative means the schedule is due.
///
/// # Errors
///
/// Returns [`Error::InvalidSchedule`] when `schedule` does not match
/// [`SCHEDULE_FORMAT`] or names a local time that does not exist.
pub fn time_until_schedule(schedule: &str, now: DateTime<Local>) -> Result<TimeDelta> {
    let naive = NaiveDateTime::parse_from_str(schedule, SCHEDULE_FORMAT)
        .map_err(|e| Error::invalid_schedule(schedule, e.to_string()))?;
    let at = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| Error::invalid_schedule(schedule, "no such local time"))?;
    Ok(at.signed_duration_since(now))
}
