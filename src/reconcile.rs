//! Pluggable reconcile strategy plus the collaborators it writes through: the resource store and
//! the event sink.

pub mod finalizer;
pub mod recorder;
pub mod store;
pub mod strategy;

pub use finalizer::{DomainFuture, DomainLogic, FinalizingReconciler, NoopDomain};
pub use recorder::{
    EventRecorder, EventReporter, MemoryRecorder, ObjectRef, RecordedEvent, Severity,
    TracingRecorder,
};
pub use store::{ResourceStore, StoreError, StoreFuture};
pub use strategy::{ReconcileError, ReconcileFuture, Reconciler};
