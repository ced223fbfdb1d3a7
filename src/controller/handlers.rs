//! Turns watch notifications into reconcile keys.
//!
//! Handlers run on the feed's delivery path, so they only derive a key, record the notification,
//! and hand the key to the queue. Objects already `Available` are not enqueued on add or update
//! unless their deletion has been requested; deletions are always enqueued so finalizer cleanup
//! can run.

use crate::cache::ResourceEventHandler;
use crate::queue::RateLimitingQueue;
use crate::reconcile::recorder::{
    EventReporter, MESSAGE_CREATE, MESSAGE_DELETE, MESSAGE_UPDATE, REASON_EVENT,
};
use crate::resource::{
    deletion_key_for, key_for, DeletedObject, ReconcileKey, Resource, ResourceSpec,
};
use crate::runtime::telemetry::Telemetry;
use serde::Serialize;
use std::sync::Arc;

pub struct KeyExtractor {
    events: EventReporter,
    telemetry: Arc<Telemetry>,
}

impl KeyExtractor {
    pub fn new(events: EventReporter, telemetry: Arc<Telemetry>) -> Self {
        Self { events, telemetry }
    }

    pub fn on_add<S: ResourceSpec>(&self, object: &Resource<S>) -> Option<ReconcileKey> {
        if self.is_settled(object, "add") {
            return None;
        }
        let key = self.key_or_drop(key_for(object), "add")?;

        audit(MESSAGE_CREATE, object.name(), &[object]);
        self.events.normal(object, REASON_EVENT, MESSAGE_CREATE);
        Some(key)
    }

    /// The key is derived from `new`; identity does not change across updates.
    pub fn on_update<S: ResourceSpec>(
        &self,
        old: &Resource<S>,
        new: &Resource<S>,
    ) -> Option<ReconcileKey> {
        if self.is_settled(new, "update") {
            return None;
        }
        let key = self.key_or_drop(key_for(new), "update")?;

        audit(MESSAGE_UPDATE, new.name(), &[old, new]);
        self.events.normal(new, REASON_EVENT, MESSAGE_UPDATE);
        Some(key)
    }

    pub fn on_delete<S: ResourceSpec>(&self, deleted: &DeletedObject<S>) -> Option<ReconcileKey> {
        let key = self.key_or_drop(deletion_key_for(deleted), "delete")?;

        match deleted.last_known() {
            Some(object) => {
                let object: &Resource<S> = object;
                audit(MESSAGE_DELETE, object.name(), &[object]);
                self.events.normal(object, REASON_EVENT, MESSAGE_DELETE);
            }
            None => audit::<S>(MESSAGE_DELETE, key.as_str(), &[]),
        }
        Some(key)
    }

    fn is_settled<S>(&self, object: &Resource<S>, notification: &'static str) -> bool {
        if !object.phase().is_settled() || object.deletion_requested() {
            return false;
        }
        self.telemetry.record_suppressed_notification();
        tracing::trace!(
            notification,
            namespace = object.namespace(),
            name = object.name(),
            "object already available; not enqueued"
        );
        true
    }

    fn key_or_drop<E: std::fmt::Display>(
        &self,
        key: Result<ReconcileKey, E>,
        notification: &'static str,
    ) -> Option<ReconcileKey> {
        match key {
            Ok(key) => Some(key),
            Err(err) => {
                self.telemetry.record_dropped_notification();
                tracing::debug!(notification, error = %err, "notification dropped");
                None
            }
        }
    }
}

fn audit<S: Serialize>(operation: &str, name: &str, objects: &[&Resource<S>]) {
    let rendered = serde_json::to_string(objects)
        .unwrap_or_else(|err| format!("<unserializable: {err}>"));
    tracing::info!(
        target: "reconciler::audit",
        operation,
        name,
        state = "received",
        objects = %rendered,
        "notification accepted"
    );
}

/// Feed handler that pushes every accepted key into the work queue.
pub struct QueueingHandler {
    extractor: KeyExtractor,
    queue: Arc<RateLimitingQueue>,
}

impl QueueingHandler {
    pub fn new(extractor: KeyExtractor, queue: Arc<RateLimitingQueue>) -> Self {
        Self { extractor, queue }
    }

    fn enqueue(&self, key: Option<ReconcileKey>) {
        if let Some(key) = key {
            self.queue.add(key);
        }
    }
}

impl<S: ResourceSpec> ResourceEventHandler<S> for QueueingHandler {
    fn on_add(&self, object: &Arc<Resource<S>>) {
        self.enqueue(self.extractor.on_add(object.as_ref()));
    }

    fn on_update(&self, old: &Arc<Resource<S>>, new: &Arc<Resource<S>>) {
        self.enqueue(self.extractor.on_update(old.as_ref(), new.as_ref()));
    }

    fn on_delete(&self, deleted: &DeletedObject<S>) {
        self.enqueue(self.extractor.on_delete(deleted));
    }
}
