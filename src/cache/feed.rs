use super::index::{ObjectCache, SnapshotCache};
use crate::resource::{key_for, DeletedObject, ReconcileKey, Resource, ResourceSpec, Tombstone};
use crate::runtime::config::MAX_INTERVAL;
use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// One delivery from the watch transport.
#[derive(Debug, Clone)]
pub enum FeedEvent<S> {
    /// Complete listing of the collection. The first one completes the initial sync.
    Listed(Vec<Resource<S>>),
    /// Object created or changed.
    Applied(Resource<S>),
    /// Object removed from the store; carries its final known state.
    Deleted(Resource<S>),
}

/// Notification callbacks. Invoked sequentially, in delivery order, and must not block.
pub trait ResourceEventHandler<S>: Send + Sync + 'static {
    fn on_add(&self, object: &Arc<Resource<S>>);
    fn on_update(&self, old: &Arc<Resource<S>>, new: &Arc<Resource<S>>);
    fn on_delete(&self, deleted: &DeletedObject<S>);
}

/// Applies feed events to a [`SnapshotCache`] and fans the resulting notifications out to the
/// registered handlers.
pub struct Informer<S> {
    cache: Arc<SnapshotCache<S>>,
    handlers: RwLock<Vec<Arc<dyn ResourceEventHandler<S>>>>,
}

impl<S: ResourceSpec> Informer<S> {
    pub fn new(cache: Arc<SnapshotCache<S>>) -> Self {
        Self {
            cache,
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn cache(&self) -> Arc<SnapshotCache<S>> {
        self.cache.clone()
    }

    pub fn add_handler(&self, handler: Arc<dyn ResourceEventHandler<S>>) {
        self.handlers.write().push(handler);
    }

    pub fn apply(&self, event: FeedEvent<S>) {
        match event {
            FeedEvent::Listed(objects) => self.apply_listing(objects),
            FeedEvent::Applied(object) => self.apply_upsert(Arc::new(object)),
            FeedEvent::Deleted(object) => self.apply_delete(object),
        }
    }

    /// Redelivers every cached object as an update to itself.
    pub fn resync(&self) {
        let objects = self.cache.list();
        tracing::debug!(objects = objects.len(), "resyncing cached objects");
        let handlers = self.handlers();
        for object in &objects {
            for handler in &handlers {
                handler.on_update(object, object);
            }
        }
    }

    /// Consumes `feed` until `shutdown` fires, resyncing every `resync_interval` once the cache
    /// has synced. A closed feed stops event delivery but not resyncs.
    pub async fn run<F>(&self, feed: F, resync_interval: Duration, shutdown: CancellationToken)
    where
        F: Stream<Item = FeedEvent<S>> + Send,
    {
        let mut feed = std::pin::pin!(feed);
        let mut feed_open = true;
        let resync_interval = resync_interval.min(MAX_INTERVAL);
        let mut ticker = time::interval_at(Instant::now() + resync_interval, resync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::debug!("informer stopping");
                    break;
                }
                event = feed.next(), if feed_open => match event {
                    Some(event) => self.apply(event),
                    None => {
                        feed_open = false;
                        tracing::warn!("watch feed closed; serving cached state only");
                    }
                },
                _ = ticker.tick() => {
                    if self.cache.has_synced() {
                        self.resync();
                    }
                }
            }
        }
    }

    fn handlers(&self) -> Vec<Arc<dyn ResourceEventHandler<S>>> {
        self.handlers.read().clone()
    }

    fn apply_listing(&self, objects: Vec<Resource<S>>) {
        let handlers = self.handlers();
        let mut listed: HashSet<ReconcileKey> = HashSet::with_capacity(objects.len());

        for object in objects {
            let object = Arc::new(object);
            match self.cache.insert(object.clone()) {
                Ok((key, previous)) => {
                    listed.insert(key);
                    notify_upsert(&handlers, previous.as_ref(), &object);
                }
                Err(err) => tracing::warn!(error = %err, "skipping listed object without identity"),
            }
        }

        for key in self.cache.keys() {
            if listed.contains(&key) {
                continue;
            }
            let last_known = self.cache.remove(&key);
            let deleted = DeletedObject::Tombstone(Tombstone { key, last_known });
            for handler in &handlers {
                handler.on_delete(&deleted);
            }
        }

        if !self.cache.has_synced() {
            self.cache.mark_synced();
            tracing::info!(objects = self.cache.len(), "initial list applied; cache synced");
        }
    }

    fn apply_upsert(&self, object: Arc<Resource<S>>) {
        match self.cache.insert(object.clone()) {
            Ok((_, previous)) => notify_upsert(&self.handlers(), previous.as_ref(), &object),
            Err(err) => tracing::warn!(error = %err, "dropping watch event without identity"),
        }
    }

    fn apply_delete(&self, object: Resource<S>) {
        match key_for(&object) {
            Ok(key) => {
                self.cache.remove(&key);
            }
            Err(err) => tracing::warn!(error = %err, "deleted object has no identity"),
        }
        let deleted = DeletedObject::Known(Arc::new(object));
        for handler in &self.handlers() {
            handler.on_delete(&deleted);
        }
    }
}

fn notify_upsert<S: ResourceSpec>(
    handlers: &[Arc<dyn ResourceEventHandler<S>>],
    previous: Option<&Arc<Resource<S>>>,
    current: &Arc<Resource<S>>,
) {
    for handler in handlers {
        match previous {
            Some(previous) => handler.on_update(previous, current),
            None => handler.on_add(current),
        }
    }
}
