//! Versioned resource snapshots and the keys that identify them.

pub mod key;
pub mod object;

pub use key::{deletion_key_for, key_for, DeletedObject, KeyError, ReconcileKey, Tombstone};
pub use object::{
    CurrentStatus, LastOperation, ObjectMeta, Phase, Resource, ResourceSpec, ResourceStatus,
};
