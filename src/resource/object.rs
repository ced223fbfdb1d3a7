use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bound shared by every declared-state payload the controller can carry.
///
/// `Serialize` is required so accepted notifications can be rendered into audit records.
pub trait ResourceSpec: Clone + fmt::Debug + Serialize + Send + Sync + 'static {}

impl<T> ResourceSpec for T where T: Clone + fmt::Debug + Serialize + Send + Sync + 'static {}

/// Lifecycle tag carried by every snapshot.
///
/// `Processing` is never persisted; it only describes an object that a worker currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Unknown,
    Processing,
    Available,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Unknown => "Unknown",
            Phase::Processing => "Processing",
            Phase::Available => "Available",
        }
    }

    /// Settled objects need no further reconciliation.
    pub fn is_settled(&self) -> bool {
        matches!(self, Phase::Available)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Opaque version used for optimistic concurrency on writes.
    #[serde(default)]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn has_finalizer(&self, token: &str) -> bool {
        self.finalizers.iter().any(|existing| existing == token)
    }

    /// Adds `token` unless it is already present. Returns whether the list changed.
    pub fn add_finalizer(&mut self, token: &str) -> bool {
        if self.has_finalizer(token) {
            return false;
        }
        self.finalizers.push(token.to_owned());
        true
    }

    /// Removes every occurrence of `token`. Returns whether the list changed.
    pub fn remove_finalizer(&mut self, token: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|existing| existing != token);
        before != self.finalizers.len()
    }

    pub fn deletion_requested(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(default)]
    pub current_status: CurrentStatus,
    #[serde(default)]
    pub last_operation: LastOperation,
}

/// Snapshot of one versioned object: declared spec plus observed status.
///
/// Snapshots published by the cache are shared behind `Arc` and never mutated; reconciliation
/// clones one into a private working copy before touching any field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource<S> {
    pub metadata: ObjectMeta,
    pub spec: S,
    #[serde(default)]
    pub status: ResourceStatus,
}

impl<S> Resource<S> {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: S) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: ResourceStatus::default(),
        }
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.status.current_status.phase = phase;
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn phase(&self) -> Phase {
        self.status.current_status.phase
    }

    pub fn deletion_requested(&self) -> bool {
        self.metadata.deletion_requested()
    }

    /// Stamps both status timestamps with `now`.
    pub fn stamp_update_time(&mut self, now: DateTime<Utc>) {
        self.status.current_status.last_update_time = Some(now);
        self.status.last_operation.last_update_time = Some(now);
    }
}
