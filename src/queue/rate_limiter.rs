use crate::resource::ReconcileKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(5);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(1000);
pub const DEFAULT_BUCKET_QPS: f64 = 10.0;
pub const DEFAULT_BUCKET_BURST: u32 = 100;

/// Decides how long a key waits before it is retried.
pub trait RateLimiter: Send + Sync + 'static {
    /// Returns the delay for the next retry of `key` and records one more failure.
    fn when(&self, key: &ReconcileKey) -> Duration;

    /// Clears the failure history of `key`.
    fn forget(&self, key: &ReconcileKey);

    /// Consecutive failures recorded for `key`.
    fn num_requeues(&self, key: &ReconcileKey) -> u32;
}

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`.
#[derive(Debug)]
pub struct ItemExponentialRateLimiter {
    base_delay: Duration,
    max_delay: Duration,
    failures: Mutex<HashMap<ReconcileKey, u32>>,
}

impl ItemExponentialRateLimiter {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for ItemExponentialRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_DELAY)
    }
}

impl RateLimiter for ItemExponentialRateLimiter {
    fn when(&self, key: &ReconcileKey) -> Duration {
        let exponent = {
            let mut failures = self.failures.lock();
            let count = failures.entry(key.clone()).or_insert(0);
            let exponent = *count;
            *count = count.saturating_add(1);
            exponent
        };

        backoff_for(self.base_delay, self.max_delay, exponent)
    }

    fn forget(&self, key: &ReconcileKey) {
        self.failures.lock().remove(key);
    }

    fn num_requeues(&self, key: &ReconcileKey) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }
}

fn backoff_for(base: Duration, max: Duration, exponent: u32) -> Duration {
    if exponent >= 64 {
        return max;
    }
    let scaled = base.as_nanos().saturating_mul(1u128 << exponent);
    if scaled >= max.as_nanos() {
        return max;
    }
    // `scaled < max` so it fits into the u64 nanosecond range of `Duration::from_nanos`.
    Duration::from_nanos(u64::try_from(scaled).unwrap_or(u64::MAX))
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Process-wide token bucket: spaces retries out once `burst` tokens are used up.
///
/// Every call to [`RateLimiter::when`] reserves a token, even when it has to wait for it.
pub struct BucketRateLimiter {
    qps: f64,
    burst: u32,
    state: Mutex<BucketState>,
}

impl BucketRateLimiter {
    pub fn new(qps: f64, burst: u32) -> Self {
        Self {
            qps,
            burst,
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                last_refill: Instant::now(),
            }),
        }
    }
}

impl Default for BucketRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_QPS, DEFAULT_BUCKET_BURST)
    }
}

impl RateLimiter for BucketRateLimiter {
    fn when(&self, _key: &ReconcileKey) -> Duration {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.qps).min(f64::from(self.burst));
        state.last_refill = now;
        state.tokens -= 1.0;

        if state.tokens >= 0.0 || self.qps <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.qps)
        }
    }

    fn forget(&self, _key: &ReconcileKey) {}

    fn num_requeues(&self, _key: &ReconcileKey) -> u32 {
        0
    }
}

/// Combines limiters by taking the longest delay any of them asks for.
pub struct MaxOfRateLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl MaxOfRateLimiter {
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

impl RateLimiter for MaxOfRateLimiter {
    fn when(&self, key: &ReconcileKey) -> Duration {
        self.limiters
            .iter()
            .map(|limiter| limiter.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, key: &ReconcileKey) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &ReconcileKey) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// Per-key exponential backoff combined with an overall token bucket.
pub fn default_controller_rate_limiter(
    base_delay: Duration,
    max_delay: Duration,
    qps: f64,
    burst: u32,
) -> MaxOfRateLimiter {
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialRateLimiter::new(base_delay, max_delay)),
        Box::new(BucketRateLimiter::new(qps, burst)),
    ])
}
