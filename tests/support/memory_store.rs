use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, Stream};
use parking_lot::Mutex;
use reconciler::{FeedEvent, Resource, ResourceSpec, ResourceStore, StoreError, StoreFuture};
use tokio::sync::mpsc;

/// In-memory resource store with optimistic concurrency.
///
/// Every accepted write bumps `resource_version` and is echoed on the watch feed, so a runner
/// consuming [`MemoryStore::new`]'s stream observes its own writes the way it would against a
/// real store. Objects whose deletion was requested disappear once their last finalizer is gone.
pub struct MemoryStore<S> {
    state: Mutex<StoreState<S>>,
    feed: mpsc::UnboundedSender<FeedEvent<S>>,
    status_writes: AtomicU64,
    object_writes: AtomicU64,
    unavailable: Mutex<Option<String>>,
}

struct StoreState<S> {
    objects: HashMap<String, Resource<S>>,
    next_version: u64,
}

impl<S> StoreState<S> {
    fn next_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

impl<S: ResourceSpec> MemoryStore<S> {
    pub fn new() -> (Arc<Self>, impl Stream<Item = FeedEvent<S>> + Send + 'static) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            state: Mutex::new(StoreState {
                objects: HashMap::new(),
                next_version: 0,
            }),
            feed: tx,
            status_writes: AtomicU64::new(0),
            object_writes: AtomicU64::new(0),
            unavailable: Mutex::new(None),
        });
        let feed = stream::unfold(rx, |mut rx| async move {
            let event = rx.recv().await?;
            Some((event, rx))
        });
        (store, feed)
    }

    /// Stores `object` without notifying watchers. Use before [`MemoryStore::publish_listing`].
    pub fn seed(&self, mut object: Resource<S>) -> Resource<S> {
        let mut state = self.state.lock();
        object.metadata.resource_version = state.next_version();
        state.objects.insert(key_of(&object), object.clone());
        object
    }

    /// Emits a full listing of the current contents.
    pub fn publish_listing(&self) {
        let state = self.state.lock();
        let objects = state.objects.values().cloned().collect();
        let _ = self.feed.send(FeedEvent::Listed(objects));
    }

    /// Creates or replaces `object` as an external client would and notifies watchers.
    pub fn create(&self, object: Resource<S>) -> Resource<S> {
        let mut state = self.state.lock();
        let mut object = object;
        object.metadata.resource_version = state.next_version();
        state.objects.insert(key_of(&object), object.clone());
        let _ = self.feed.send(FeedEvent::Applied(object.clone()));
        object
    }

    /// Applies an external edit to the stored object and notifies watchers.
    pub fn modify<F>(&self, key: &str, edit: F) -> Option<Resource<S>>
    where
        F: FnOnce(&mut Resource<S>),
    {
        let mut state = self.state.lock();
        let version = state.next_version();
        let object = state.objects.get_mut(key)?;
        edit(object);
        object.metadata.resource_version = version;
        let object = object.clone();
        let _ = self.feed.send(FeedEvent::Applied(object.clone()));
        Some(object)
    }

    /// Marks the object for deletion. Without finalizers it is removed right away.
    pub fn request_deletion(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let version = state.next_version();
        let Some(object) = state.objects.get_mut(key) else {
            return false;
        };
        if object.metadata.deletion_timestamp.is_none() {
            object.metadata.deletion_timestamp = Some(Utc::now());
        }
        object.metadata.resource_version = version;
        let object = object.clone();
        self.publish_write(&mut state, object);
        true
    }

    pub fn get(&self, key: &str) -> Option<Resource<S>> {
        self.state.lock().objects.get(key).cloned()
    }

    pub fn status_writes(&self) -> u64 {
        self.status_writes.load(Ordering::SeqCst)
    }

    pub fn object_writes(&self) -> u64 {
        self.object_writes.load(Ordering::SeqCst)
    }

    /// While set, every write fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, reason: Option<&str>) {
        *self.unavailable.lock() = reason.map(str::to_owned);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        match self.unavailable.lock().clone() {
            Some(reason) => Err(StoreError::Unavailable(reason)),
            None => Ok(()),
        }
    }

    fn check_version<'a>(
        state: &'a mut StoreState<S>,
        object: &Resource<S>,
    ) -> Result<&'a mut Resource<S>, StoreError> {
        let key = key_of(object);
        let Some(stored) = state.objects.get_mut(&key) else {
            return Err(StoreError::NotFound { key });
        };
        if stored.metadata.resource_version != object.metadata.resource_version {
            return Err(StoreError::Conflict {
                key,
                expected: object.metadata.resource_version.clone(),
                actual: stored.metadata.resource_version.clone(),
            });
        }
        Ok(stored)
    }

    fn publish_write(&self, state: &mut StoreState<S>, object: Resource<S>) {
        if object.deletion_requested() && object.metadata.finalizers.is_empty() {
            state.objects.remove(&key_of(&object));
            let _ = self.feed.send(FeedEvent::Deleted(object));
        } else {
            let _ = self.feed.send(FeedEvent::Applied(object));
        }
    }
}

impl<S: ResourceSpec> ResourceStore<S> for MemoryStore<S> {
    fn update_status(&self, object: Resource<S>) -> StoreFuture<'_, Resource<S>> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.state.lock();
            let version = state.next_version();
            let stored = Self::check_version(&mut state, &object)?;
            stored.status = object.status;
            stored.metadata.resource_version = version;
            let persisted = stored.clone();
            self.status_writes.fetch_add(1, Ordering::SeqCst);
            let _ = self.feed.send(FeedEvent::Applied(persisted.clone()));
            Ok(persisted)
        })
    }

    fn update(&self, object: Resource<S>) -> StoreFuture<'_, Resource<S>> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.state.lock();
            let version = state.next_version();
            let stored = Self::check_version(&mut state, &object)?;
            let deletion_timestamp = stored.metadata.deletion_timestamp;
            stored.metadata = object.metadata;
            stored.metadata.deletion_timestamp = deletion_timestamp;
            stored.metadata.resource_version = version;
            stored.spec = object.spec;
            let persisted = stored.clone();
            self.object_writes.fetch_add(1, Ordering::SeqCst);
            self.publish_write(&mut state, persisted.clone());
            Ok(persisted)
        })
    }
}

pub fn key_of<S>(object: &Resource<S>) -> String {
    format!("{}/{}", object.namespace(), object.name())
}
