//! # Work Queue
//!
//! Deduplicating, rate-limited, delay-capable queue of reconcile keys.
//!
//! The queue guarantees that a key is never handed to two workers at once:
//! a key re-added while it is being processed is parked until the worker
//! calls [`WorkQueue::done`], and any number of such re-adds collapse into a
//! single follow-up.
//!
//! Layers, innermost first:
//!
//! - [`queue::Queue`]: FIFO with dirty/processing sets
//! - [`delaying`]: timer heap feeding keys into the queue once due
//! - [`rate_limiter`]: per-key exponential backoff and an overall token bucket
//! - [`WorkQueue`]: the composition the controller uses

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod delaying;
pub mod queue;
pub mod rate_limiter;
mod work_queue;

pub use queue::Queue;
pub use rate_limiter::{
    Backoff, BucketRateLimiter, ExponentialBackoffLimiter, MaxOfRateLimiter, RateLimiter,
    RateLimiterConfig, RateLimiterConfigError,
};
pub use work_queue::{WorkQueue, WorkQueueConfig};
