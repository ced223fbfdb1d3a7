use crate::cache::ObjectCache;
use crate::reconcile::{ReconcileError, Reconciler};
use crate::resource::ReconcileKey;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The reconciler ran against the cached snapshot and succeeded.
    Reconciled,
    /// The key no longer resolves to an object; nothing left to do.
    Absent,
}

/// Resolves keys to the freshest cached snapshot and hands it to the reconciler.
pub struct Dispatcher<S> {
    cache: Arc<dyn ObjectCache<S>>,
    reconciler: Arc<dyn Reconciler<S>>,
}

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            reconciler: self.reconciler.clone(),
        }
    }
}

impl<S: Send + Sync + 'static> Dispatcher<S> {
    pub fn new(cache: Arc<dyn ObjectCache<S>>, reconciler: Arc<dyn Reconciler<S>>) -> Self {
        Self { cache, reconciler }
    }

    pub async fn sync(&self, key: &ReconcileKey) -> Result<SyncOutcome, ReconcileError> {
        let Some(object) = self.cache.get_by_key(key)? else {
            tracing::debug!(key = %key, "object no longer cached; skipping");
            return Ok(SyncOutcome::Absent);
        };

        self.reconciler.reconcile(object).await?;
        Ok(SyncOutcome::Reconciled)
    }
}
