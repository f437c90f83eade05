//! Content hashing for change detection.
//!
//! A payload's hash ignores the top-level `meta` block, which the API
//! refreshes on every response (timing, counts, cursor) even when the
//! results themselves are unchanged.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Top-level field excluded from content hashes.
pub const VOLATILE_FIELD: &str = "meta";

/// Hex characters kept from the SHA-256 digest.
pub const CONTENT_HASH_LEN: usize = 16;

/// Stable hash of a payload, excluding [`VOLATILE_FIELD`].
pub fn content_hash(payload: &Value) -> String {
    let mut payload = payload.clone();
    if let Value::Object(map) = &mut payload {
        map.remove(VOLATILE_FIELD);
    }

    let mut hasher = Sha256::new();
    hasher.update(sorted(&payload).to_string().as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(CONTENT_HASH_LEN);
    digest
}

/// Rebuild a value with every object's keys in lexicographic order.
fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), sorted(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// What the cache knows about an existing entry when new content arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMetadata {
    pub content_hash: String,
    pub retrieved_at: DateTime<Utc>,
}

/// Decide whether freshly fetched content should replace the cached entry.
///
/// Always true without prior metadata or when the hash changed; with
/// `max_age`, also true once the existing entry is older than that.
pub fn should_update_cache(
    existing: Option<&CachedMetadata>, new_hash: &str, max_age: Option<Duration>, now: DateTime<Utc>,
) -> bool {
    let Some(existing) = existing else {
        return true;
    };

    if existing.content_hash != new_hash {
        return true;
    }

    match max_age {
        Some(max_age) => {
            let age = now.signed_duration_since(existing.retrieved_at);
            age.to_std().map(|age| age > max_age).unwrap_or(false)
        }
        None => false,
    }
}
