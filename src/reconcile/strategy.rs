use super::store::StoreError;
use crate::cache::CacheError;
use crate::resource::Resource;
use anyhow::Error as AnyError;
use core::future::Future;
use core::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

pub type ReconcileFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ReconcileError>> + Send + 'a>>;

/// Everything that sends a key back into the retry cycle.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("domain logic failed: {0:#}")]
    Domain(AnyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("reconcile panicked: {0}")]
    Panicked(String),
}

impl ReconcileError {
    pub fn domain(error: impl Into<AnyError>) -> Self {
        ReconcileError::Domain(error.into())
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, ReconcileError::Panicked(_))
    }
}

/// Domain strategy invoked with the freshest cached snapshot of a key.
///
/// The snapshot is shared with the cache and must not be mutated; implementations clone it into a
/// private working copy before changing anything.
pub trait Reconciler<S>: Send + Sync + 'static {
    fn reconcile(&self, object: Arc<Resource<S>>) -> ReconcileFuture<'_>;
}
