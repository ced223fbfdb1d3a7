//! The reconciliation engine: key extraction, dispatch, worker loops, and their lifecycle.

pub mod handlers;
pub mod lifecycle;
pub mod sync;
mod worker_pool;

pub use handlers::{KeyExtractor, QueueingHandler};
pub use lifecycle::{
    wait_for_cache_sync, Controller, ControllerParams, DEFAULT_CACHE_SYNC_POLL_INTERVAL,
};
pub use sync::{Dispatcher, SyncOutcome};
