//! Requeue delay policies.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;

/// Rejected [`RateLimiterConfig`] values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateLimiterConfigError {
    #[error("rate limiter qps must be a positive number, got {qps}")]
    InvalidQps { qps: f64 },

    #[error("backoff factor must be at least 1, got {factor}")]
    InvalidFactor { factor: f64 },
}

/// Decides how long a key waits before it is retried.
pub trait RateLimiter<K>: Send + Sync {
    /// Delay before `key` may be retried. Records a retry for the key.
    fn when(&self, key: &K) -> Duration;

    /// Clear all retry history for `key`.
    fn forget(&self, key: &K);

    /// Retries recorded for `key` since it was last forgotten.
    fn num_requeues(&self, key: &K) -> u32;
}

/// Tunables for the default controller limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Growth factor applied per consecutive failure.
    pub factor: f64,
    /// Upper bound on any single per-key delay.
    pub max_delay: Duration,
    /// Sustained requeues per second across all keys.
    pub qps: f64,
    /// Requeues allowed in a burst before `qps` applies.
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            factor: 2.0,
            max_delay: Duration::from_secs(1000),
            qps: 10.0,
            burst: 100,
        }
    }
}

impl RateLimiterConfig {
    /// Check the tunables before building a limiter from them.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimiterConfigError`] for a non-positive `qps` or a
    /// `factor` below 1.
    pub fn validate(&self) -> Result<(), RateLimiterConfigError> {
        if !(self.qps.is_finite() && self.qps > 0.0) {
            return Err(RateLimiterConfigError::InvalidQps { qps: self.qps });
        }
        if !(self.factor.is_finite() && self.factor >= 1.0) {
            return Err(RateLimiterConfigError::InvalidFactor {
                factor: self.factor,
            });
        }
        Ok(())
    }

    /// Per-key exponential backoff combined with an overall token bucket.
    #[must_use]
    pub fn build<K>(&self) -> MaxOfRateLimiter<K>
    where
        K: Clone + Eq + Hash + Send + Sync + 'static,
    {
        MaxOfRateLimiter::new(vec![
            Box::new(ExponentialBackoffLimiter::new(
                self.base_delay,
                self.factor,
                self.max_delay,
            )),
            Box::new(BucketRateLimiter::new(self.qps, self.burst)),
        ])
    }
}

/// Retry bookkeeping for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub retries: u32,
    pub next_eligible: Instant,
}

/// `base * factor^retries`, capped at `max`, tracked per key.
pub struct ExponentialBackoffLimiter<K> {
    base: Duration,
    factor: f64,
    max: Duration,
    failures: Mutex<HashMap<K, Backoff>>,
}

impl<K: Clone + Eq + Hash> ExponentialBackoffLimiter<K> {
    #[must_use]
    pub fn new(base: Duration, factor: f64, max: Duration) -> Self {
        Self {
            base,
            factor,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Current retry state of `key`, if any.
    #[must_use]
    pub fn backoff(&self, key: &K) -> Option<Backoff> {
        self.failures.lock().get(key).copied()
    }

    fn delay_for(&self, retries: u32) -> Duration {
        let exponent = i32::try_from(retries).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.factor.powi(exponent);
        Duration::try_from_secs_f64(secs).map_or(self.max, |delay| delay.min(self.max))
    }
}

impl<K> RateLimiter<K> for ExponentialBackoffLimiter<K>
where
    K: Clone + Eq + Hash + Send + Sync,
{
    fn when(&self, key: &K) -> Duration {
        let mut failures = self.failures.lock();
        let retries = failures.get(key).map_or(0, |b| b.retries);
        let delay = self.delay_for(retries);
        failures.insert(
            key.clone(),
            Backoff {
                retries: retries.saturating_add(1),
                next_eligible: Instant::now() + delay,
            },
        );
        delay
    }

    fn forget(&self, key: &K) {
        self.failures.lock().remove(key);
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.failures.lock().get(key).map_or(0, |b| b.retries)
    }
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Longest delay the token bucket hands out.
const MAX_BUCKET_DELAY: Duration = Duration::from_secs(1000);

/// Token bucket shared by all keys.
///
/// Each call reserves one token; when the bucket is empty the returned delay
/// is how long until the reserved token becomes available, capped at
/// [`MAX_BUCKET_DELAY`].
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    #[must_use]
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps: qps.max(f64::MIN_POSITIVE),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }
}

impl<K> RateLimiter<K> for BucketRateLimiter {
    fn when(&self, _key: &K) -> Duration {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst) - 1.0;
        bucket.last = now;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-bucket.tokens / self.qps)
                .map_or(MAX_BUCKET_DELAY, |delay| delay.min(MAX_BUCKET_DELAY))
        }
    }

    fn forget(&self, _key: &K) {}

    fn num_requeues(&self, _key: &K) -> u32 {
        0
    }
}

/// Applies every inner limiter and waits for the slowest.
pub struct MaxOfRateLimiter<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOfRateLimiter<K> {
    #[must_use]
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }
}

impl<K> RateLimiter<K> for MaxOfRateLimiter<K> {
    fn when(&self, key: &K) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, key: &K) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}
