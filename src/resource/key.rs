use super::object::Resource;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Identity of one resource instance: `namespace/name`, or bare `name` for cluster-scoped objects.
///
/// Keys carry identity only, never a payload, so a worker always resolves them against the
/// freshest cached snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReconcileKey(Arc<str>);

impl ReconcileKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReconcileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ReconcileKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ReconcileKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ReconcileKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl Serialize for ReconcileKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("object has no name")]
    MissingName,
}

/// Final state of an object whose deletion was observed only after the fact (e.g. a relist).
#[derive(Debug, Clone)]
pub struct Tombstone<S> {
    pub key: ReconcileKey,
    pub last_known: Option<Arc<Resource<S>>>,
}

/// Payload of a delete notification.
#[derive(Debug, Clone)]
pub enum DeletedObject<S> {
    Known(Arc<Resource<S>>),
    Tombstone(Tombstone<S>),
}

impl<S> DeletedObject<S> {
    /// Best available view of the deleted object, if any.
    pub fn last_known(&self) -> Option<&Arc<Resource<S>>> {
        match self {
            DeletedObject::Known(object) => Some(object),
            DeletedObject::Tombstone(tombstone) => tombstone.last_known.as_ref(),
        }
    }
}

pub fn key_for<S>(object: &Resource<S>) -> Result<ReconcileKey, KeyError> {
    let meta = &object.metadata;
    if meta.name.is_empty() {
        return Err(KeyError::MissingName);
    }
    if meta.namespace.is_empty() {
        return Ok(ReconcileKey::new(&meta.name));
    }
    Ok(ReconcileKey::from(format!("{}/{}", meta.namespace, meta.name)))
}

/// Deletion-aware variant of [`key_for`]: tombstones already carry their key, so metadata that
/// has been torn down does not prevent cleanup from being scheduled.
pub fn deletion_key_for<S>(deleted: &DeletedObject<S>) -> Result<ReconcileKey, KeyError> {
    match deleted {
        DeletedObject::Tombstone(tombstone) => Ok(tombstone.key.clone()),
        DeletedObject::Known(object) => key_for(object),
    }
}
