//! Local side of the watch feed: an indexed snapshot cache plus the informer that keeps it current
//! and fans notifications out to handlers. The transport producing feed events lives elsewhere.

pub mod feed;
pub mod index;

pub use feed::{FeedEvent, Informer, ResourceEventHandler};
pub use index::{CacheError, ObjectCache, SnapshotCache};
