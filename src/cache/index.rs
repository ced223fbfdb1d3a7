use crate::resource::{key_for, KeyError, ReconcileKey, Resource};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache lookup for {key} failed: {reason}")]
    Lookup { key: String, reason: String },
}

/// Read-only view of the local cache used by the controller.
pub trait ObjectCache<S>: Send + Sync + 'static {
    /// Point lookup. `Ok(None)` means the object is not (or no longer) known.
    fn get_by_key(&self, key: &ReconcileKey) -> Result<Option<Arc<Resource<S>>>, CacheError>;

    /// Whether the initial full list has been applied.
    fn has_synced(&self) -> bool;
}

/// Thread-safe index of published snapshots keyed by [`ReconcileKey`].
///
/// Snapshots are stored behind `Arc` and replaced wholesale, never edited in place.
pub struct SnapshotCache<S> {
    objects: RwLock<HashMap<ReconcileKey, Arc<Resource<S>>>>,
    synced: AtomicBool,
}

impl<S> SnapshotCache<S> {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            synced: AtomicBool::new(false),
        }
    }

    /// Publishes `object`, returning its key and the snapshot it replaced.
    pub fn insert(
        &self,
        object: Arc<Resource<S>>,
    ) -> Result<(ReconcileKey, Option<Arc<Resource<S>>>), KeyError> {
        let key = key_for(&object)?;
        let previous = self.objects.write().insert(key.clone(), object);
        Ok((key, previous))
    }

    pub fn remove(&self, key: &ReconcileKey) -> Option<Arc<Resource<S>>> {
        self.objects.write().remove(key)
    }

    pub fn get(&self, key: &ReconcileKey) -> Option<Arc<Resource<S>>> {
        self.objects.read().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<ReconcileKey> {
        self.objects.read().keys().cloned().collect()
    }

    pub fn list(&self) -> Vec<Arc<Resource<S>>> {
        self.objects.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::SeqCst);
    }
}

impl<S> Default for SnapshotCache<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Send + Sync + 'static> ObjectCache<S> for SnapshotCache<S> {
    fn get_by_key(&self, key: &ReconcileKey) -> Result<Option<Arc<Resource<S>>>, CacheError> {
        Ok(self.get(key))
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}
