//! The composed work queue used by controllers.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::delaying::{spawn_delaying_loop, DelayMessage};
use crate::queue::Queue;
use crate::rate_limiter::{RateLimiter, RateLimiterConfig};

/// Deadline used when `now + delay` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Configuration for a [`WorkQueue`].
#[derive(Debug, Clone)]
pub struct WorkQueueConfig {
    /// Name used in log fields.
    pub name: String,
    pub rate_limiter: RateLimiterConfig,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            rate_limiter: RateLimiterConfig::default(),
        }
    }
}

/// Deduplicating, rate-limited, delay-capable queue.
///
/// Must be created inside a tokio runtime: construction spawns the task that
/// releases delayed keys.
pub struct WorkQueue<K> {
    name: String,
    queue: Arc<Queue<K>>,
    delayed: mpsc::UnboundedSender<DelayMessage<K>>,
    limiter: Box<dyn RateLimiter<K>>,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    /// Create a queue with the default controller rate limiter.
    #[must_use]
    pub fn new(config: WorkQueueConfig) -> Self {
        let limiter = Box::new(config.rate_limiter.build());
        Self::with_rate_limiter(config.name, limiter)
    }

    /// Create a queue with a custom rate limiter.
    #[must_use]
    pub fn with_rate_limiter(name: impl Into<String>, limiter: Box<dyn RateLimiter<K>>) -> Self {
        let queue = Arc::new(Queue::new());
        let (delayed, rx) = mpsc::unbounded_channel();
        // Detached; ends on shut_down or when this queue is dropped.
        drop(spawn_delaying_loop(Arc::clone(&queue), rx));
        Self {
            name: name.into(),
            queue,
            delayed,
            limiter,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert `key` unless it is already pending.
    pub fn add(&self, key: K) {
        trace!(queue = %self.name, key = ?key, "add");
        self.queue.add(key);
    }

    /// Insert `key` once `delay` has elapsed.
    ///
    /// Pending timers for the same key collapse to the earliest deadline.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.queue.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        trace!(queue = %self.name, key = ?key, delay = ?delay, "add_after");
        let now = Instant::now();
        let ready_at = now.checked_add(delay).unwrap_or(now + FAR_FUTURE);
        let message = DelayMessage::Add { key, ready_at };
        if self.delayed.send(message).is_err() {
            debug!(queue = %self.name, "Delaying loop gone, dropping delayed key");
        }
    }

    /// Insert `key` after its rate-limited backoff.
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.limiter.when(&key);
        debug!(queue = %self.name, key = ?key, delay = ?delay, "Requeueing with backoff");
        self.add_after(key, delay);
    }

    /// Clear backoff history for `key`.
    pub fn forget(&self, key: &K) {
        self.limiter.forget(key);
    }

    /// Rate-limited retries recorded for `key`.
    #[must_use]
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.limiter.num_requeues(key)
    }

    /// Wait for the next key; `None` once shut down and drained.
    pub async fn get(&self) -> Option<K> {
        self.queue.get().await
    }

    /// Finish processing `key`.
    pub fn done(&self, key: &K) {
        self.queue.done(key);
    }

    /// Stop handing out keys once drained and discard pending timers.
    pub fn shut_down(&self) {
        debug!(queue = %self.name, "Shutting down work queue");
        self.queue.shut_down();
        let _ = self.delayed.send(DelayMessage::Stop);
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_shutting_down()
    }

    /// Keys ready to be handed out right now.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
