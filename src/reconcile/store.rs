use crate::resource::Resource;
use core::future::Future;
use core::pin::Pin;
use thiserror::Error;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Failures reported by the resource-store write API. All of them are retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("conflict writing {key}: expected resource version {expected:?}, store has {actual:?}")]
    Conflict {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("{key} not found in resource store")]
    NotFound { key: String },
    #[error("resource store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Write side of the external resource store.
///
/// Both writes are conditional on `metadata.resource_version` of the object passed in; a stale
/// version must fail with [`StoreError::Conflict`]. On success the persisted object, carrying its
/// new version, is returned.
pub trait ResourceStore<S>: Send + Sync + 'static {
    /// Persists `object.status` only.
    fn update_status(&self, object: Resource<S>) -> StoreFuture<'_, Resource<S>>;

    /// Persists the object itself (metadata and spec), e.g. finalizer changes.
    fn update(&self, object: Resource<S>) -> StoreFuture<'_, Resource<S>>;
}
