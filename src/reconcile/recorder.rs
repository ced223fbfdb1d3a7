use crate::resource::Resource;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const REASON_EVENT: &str = "Event";
pub const REASON_PHASE: &str = "Phase";
pub const REASON_FAILURE: &str = "Reason";

pub const MESSAGE_CREATE: &str = "Create";
pub const MESSAGE_UPDATE: &str = "Update";
pub const MESSAGE_DELETE: &str = "Delete";
pub const MESSAGE_AVAILABLE: &str = "Available";
pub const MESSAGE_DELETED: &str = "Deleted";
pub const MESSAGE_UNAVAILABLE: &str = "Unavailable";

const DEFAULT_MEMORY_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
    pub resource_version: String,
}

impl ObjectRef {
    pub fn of<S>(object: &Resource<S>) -> Self {
        Self {
            namespace: object.metadata.namespace.clone(),
            name: object.metadata.name.clone(),
            resource_version: object.metadata.resource_version.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEvent {
    pub source: String,
    pub object: ObjectRef,
    pub severity: Severity,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Fire-and-forget event sink. Implementations must never block or fail the caller.
pub trait EventRecorder: Send + Sync + 'static {
    fn record(&self, event: RecordedEvent);
}

/// Broadcasts events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, event: RecordedEvent) {
        match event.severity {
            Severity::Normal => tracing::info!(
                target: "reconciler::events",
                source = %event.source,
                namespace = %event.object.namespace,
                name = %event.object.name,
                reason = %event.reason,
                message = %event.message,
                "event recorded"
            ),
            Severity::Warning => tracing::warn!(
                target: "reconciler::events",
                source = %event.source,
                namespace = %event.object.namespace,
                name = %event.object.name,
                reason = %event.reason,
                message = %event.message,
                "event recorded"
            ),
        }
    }
}

/// Bounded in-memory sink. Events arriving while the buffer is full are dropped and counted.
#[derive(Debug)]
pub struct MemoryRecorder {
    capacity: usize,
    events: Mutex<VecDeque<RecordedEvent>>,
    dropped: AtomicU64,
}

impl MemoryRecorder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Events recorded for the object called `name`, oldest first.
    pub fn events_for(&self, name: &str) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.object.name == name)
            .cloned()
            .collect()
    }

    pub fn contains(&self, severity: Severity, reason: &str, message: &str) -> bool {
        self.events.lock().iter().any(|event| {
            event.severity == severity && event.reason == reason && event.message == message
        })
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for MemoryRecorder {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, event: RecordedEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        events.push_back(event);
    }
}

/// Stamps events with the emitting component's name before handing them to a recorder.
#[derive(Clone)]
pub struct EventReporter {
    source: Arc<str>,
    recorder: Arc<dyn EventRecorder>,
}

impl EventReporter {
    pub fn new(source: impl AsRef<str>, recorder: Arc<dyn EventRecorder>) -> Self {
        Self {
            source: Arc::from(source.as_ref()),
            recorder,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn normal<S>(&self, object: &Resource<S>, reason: &str, message: &str) {
        self.emit(object, Severity::Normal, reason, message);
    }

    pub fn warning<S>(&self, object: &Resource<S>, reason: &str, message: &str) {
        self.emit(object, Severity::Warning, reason, message);
    }

    fn emit<S>(&self, object: &Resource<S>, severity: Severity, reason: &str, message: &str) {
        self.recorder.record(RecordedEvent {
            source: self.source.to_string(),
            object: ObjectRef::of(object),
            severity,
            reason: reason.to_owned(),
            message: message.to_owned(),
            timestamp: Utc::now(),
        });
    }
}
