//! Cache records, manifests and the SQLite-backed entry store.
//!
//! - Content hashing that ignores volatile response metadata
//! - Collision-aware records tracking every URL that maps to one file
//! - Directory and unified index manifests
//! - A persistent entry store with expiry and LRU eviction

pub mod collision;
pub mod connection;
pub mod entries;
pub mod hash;
pub mod index;
pub mod migrations;
pub mod record;

pub use crate::Error;

pub use collision::{CollisionResolver, Violation};
pub use connection::CacheDb;
pub use entries::StoredEntry;
pub use hash::{CachedMetadata, content_hash, should_update_cache};
pub use index::{DirectoryIndex, IndexDocument, UnifiedIndex};
pub use record::{CacheRecord, CollisionStats, ExtendedRecord, RecordBase};
