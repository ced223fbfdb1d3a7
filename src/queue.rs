//! Deduplicating, rate-limited work queue: the single choke point that serializes processing per
//! key while letting distinct keys run concurrently on different workers.

pub mod delaying;
pub mod rate_limited;
pub mod rate_limiter;
pub mod work_queue;

pub use rate_limited::RateLimitingQueue;
pub use rate_limiter::{
    default_controller_rate_limiter, BucketRateLimiter, ItemExponentialRateLimiter,
    MaxOfRateLimiter, RateLimiter,
};
pub use work_queue::WorkQueue;
