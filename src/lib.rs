pub mod cache;
pub mod controller;
pub mod queue;
pub mod reconcile;
pub mod resource;
pub mod runtime;

pub use cache::{
    CacheError, FeedEvent, Informer, ObjectCache, ResourceEventHandler, SnapshotCache,
};
pub use controller::{
    Controller, ControllerParams, Dispatcher, KeyExtractor, QueueingHandler, SyncOutcome,
};
pub use queue::{
    default_controller_rate_limiter, BucketRateLimiter, ItemExponentialRateLimiter,
    MaxOfRateLimiter, RateLimiter, RateLimitingQueue, WorkQueue,
};
pub use reconcile::{
    DomainFuture, DomainLogic, EventRecorder, EventReporter, FinalizingReconciler, MemoryRecorder,
    NoopDomain, ObjectRef, ReconcileError, ReconcileFuture, Reconciler, RecordedEvent,
    ResourceStore, Severity, StoreError, StoreFuture, TracingRecorder,
};
pub use resource::{
    DeletedObject, KeyError, ObjectMeta, Phase, ReconcileKey, Resource, ResourceSpec, Tombstone,
};
pub use runtime::config::{ControllerConfig, ControllerConfigBuilder, ControllerConfigParams};
pub use runtime::fatal::{FatalErrorHandler, StartupError};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
