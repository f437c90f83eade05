//! Entry CRUD for the persistent tier.
//!
//! Rows are keyed by the cache key's relative path. Reads skip expired rows
//! and bump a logical access clock that LRU eviction orders by.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::CacheDb;
use super::hash::content_hash;
use crate::Error;
use crate::key::CacheKey;

/// A stored payload with its bookkeeping columns.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub key: CacheKey,
    pub data: Value,
    pub content_hash: String,
    pub stored_at: String,
    pub expires_at: Option<String>,
    pub access_count: i64,
}

/// Fixed-width RFC 3339 so timestamps compare correctly as text.
fn timestamp(at: chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

const NEXT_TICK: &str = "(SELECT COALESCE(MAX(last_accessed), 0) + 1 FROM entries)";

impl CacheDb {
    /// Insert or replace an entry.
    ///
    /// `ttl` of `None` stores an entry that never expires.
    pub async fn put_entry(&self, key: &CacheKey, data: &Value, ttl: Option<Duration>) -> Result<(), Error> {
        let cache_key = key.relative_path();
        let resource_type = key.resource_type.clone();
        let entity_id = key.id.clone();
        let hash = content_hash(data);
        let data_json = serde_json::to_string(data)?;
        let now = Utc::now();
        let stored_at = timestamp(now);
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl))
            .map(timestamp);

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    &format!(
                        "INSERT INTO entries (
                            cache_key, resource_type, entity_id, data_json, content_hash,
                            stored_at, expires_at, last_accessed, access_count
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, {NEXT_TICK}, 0)
                        ON CONFLICT(cache_key) DO UPDATE SET
                            data_json = excluded.data_json,
                            content_hash = excluded.content_hash,
                            stored_at = excluded.stored_at,
                            expires_at = excluded.expires_at,
                            last_accessed = excluded.last_accessed"
                    ),
                    params![cache_key, resource_type, entity_id, data_json, hash, stored_at, expires_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get a fresh entry, marking it as most recently used.
    ///
    /// Returns None if the key is absent or expired.
    pub async fn get_entry(&self, key: &CacheKey) -> Result<Option<StoredEntry>, Error> {
        let cache_key = key.relative_path();
        let key = key.clone();
        let now = timestamp(Utc::now());

        self.conn
            .call(move |conn| -> Result<Option<StoredEntry>, Error> {
                let touched = conn.execute(
                    &format!(
                        "UPDATE entries SET last_accessed = {NEXT_TICK}, access_count = access_count + 1
                         WHERE cache_key = ?1 AND (expires_at IS NULL OR expires_at > ?2)"
                    ),
                    params![cache_key, now],
                )?;
                if touched == 0 {
                    return Ok(None);
                }

                let row = conn.query_row(
                    "SELECT data_json, content_hash, stored_at, expires_at, access_count
                     FROM entries WHERE cache_key = ?1",
                    params![cache_key],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    },
                );

                let (data_json, content_hash, stored_at, expires_at, access_count) = match row {
                    Ok(row) => row,
                    Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };

                Ok(Some(StoredEntry {
                    key,
                    data: serde_json::from_str(&data_json)?,
                    content_hash,
                    stored_at,
                    expires_at,
                    access_count,
                }))
            })
            .await
            .map_err(Error::from)
    }

    /// Check if a fresh entry exists, without touching it.
    pub async fn has_entry(&self, key: &CacheKey) -> Result<bool, Error> {
        let cache_key = key.relative_path();
        let now = timestamp(Utc::now());
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let fresh: bool = conn.query_row(
                    "SELECT EXISTS(
                        SELECT 1 FROM entries
                        WHERE cache_key = ?1
                        AND (expires_at IS NULL OR expires_at > ?2)
                    )",
                    params![cache_key, now],
                    |row| row.get(0),
                )?;
                Ok(fresh)
            })
            .await
            .map_err(Error::from)
    }

    /// List fresh keys, optionally scoped to one resource type.
    pub async fn list_entries(&self, resource_type: Option<&str>) -> Result<Vec<CacheKey>, Error> {
        let resource_type = resource_type.map(str::to_string);
        let now = timestamp(Utc::now());
        self.conn
            .call(move |conn| -> Result<Vec<CacheKey>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT resource_type, entity_id FROM entries
                     WHERE (?1 IS NULL OR resource_type = ?1)
                     AND (expires_at IS NULL OR expires_at > ?2)
                     ORDER BY cache_key",
                )?;
                let keys = stmt
                    .query_map(params![resource_type, now], |row| {
                        Ok(CacheKey { resource_type: row.get(0)?, id: row.get(1)? })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of stored rows, expired ones included.
    pub async fn count_entries(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every entry of one resource type.
    ///
    /// Returns the number of deleted entries.
    pub async fn delete_entries_by_type(&self, resource_type: &str) -> Result<u64, Error> {
        let resource_type = resource_type.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM entries WHERE resource_type = ?1", params![resource_type])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every entry.
    pub async fn clear_entries(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM entries", [])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete expired entries.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_expired_entries(&self) -> Result<u64, Error> {
        let now = timestamp(Utc::now());
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(
                    "DELETE FROM entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                    params![now],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Evict least recently used entries once the store exceeds `max_entries`.
    ///
    /// Removes at least `batch` rows per pass so eviction does not run on
    /// every write. Returns the number of deleted entries.
    pub async fn evict_lru_entries(&self, max_entries: usize, batch: usize) -> Result<u64, Error> {
        let max = max_entries as i64;
        let batch = batch as i64;
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
                if count <= max {
                    return Ok(0);
                }

                let to_delete = (count - max).max(batch).min(count);
                let deleted = conn.execute(
                    "DELETE FROM entries WHERE cache_key IN (
                        SELECT cache_key FROM entries ORDER BY last_accessed ASC LIMIT ?1
                    )",
                    params![to_delete],
                )?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_and_get() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let key = CacheKey::entity("works", "W1");
        let data = json!({"id": "W1", "title": "A"});

        db.put_entry(&key, &data, None).await.unwrap();

        let entry = db.get_entry(&key).await.unwrap().unwrap();
        assert_eq!(entry.data, data);
        assert_eq!(entry.content_hash, content_hash(&data));
        assert_eq!(entry.access_count, 1);
        assert!(entry.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.get_entry(&CacheKey::entity("works", "W404")).await.unwrap().is_none());
        assert!(!db.has_entry(&CacheKey::entity("works", "W404")).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let key = CacheKey::entity("works", "W1");
        db.put_entry(&key, &json!({"id": "W1"}), Some(Duration::ZERO)).await.unwrap();

        assert!(!db.has_entry(&key).await.unwrap());
        assert!(db.get_entry(&key).await.unwrap().is_none());
        assert_eq!(db.purge_expired_entries().await.unwrap(), 1);
        assert_eq!(db.count_entries().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_and_delete_by_type() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry(&CacheKey::entity("works", "W1"), &json!({}), None).await.unwrap();
        db.put_entry(&CacheKey::entity("works", "W2"), &json!({}), None).await.unwrap();
        db.put_entry(&CacheKey::entity("authors", "A1"), &json!({}), None).await.unwrap();

        let works = db.list_entries(Some("works")).await.unwrap();
        assert_eq!(works, vec![CacheKey::entity("works", "W1"), CacheKey::entity("works", "W2")]);
        assert_eq!(db.list_entries(None).await.unwrap().len(), 3);

        assert_eq!(db.delete_entries_by_type("works").await.unwrap(), 2);
        assert_eq!(db.list_entries(None).await.unwrap(), vec![CacheKey::entity("authors", "A1")]);
    }

    #[tokio::test]
    async fn test_evict_lru_removes_least_recently_used() {
        let db = CacheDb::open_in_memory().await.unwrap();
        for i in 1..=4 {
            db.put_entry(&CacheKey::entity("works", format!("W{i}")), &json!({"i": i}), None)
                .await
                .unwrap();
        }
        // W1 becomes the most recently used
        db.get_entry(&CacheKey::entity("works", "W1")).await.unwrap();

        let deleted = db.evict_lru_entries(3, 1).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(!db.has_entry(&CacheKey::entity("works", "W2")).await.unwrap());
        assert!(db.has_entry(&CacheKey::entity("works", "W1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_evict_lru_batches() {
        let db = CacheDb::open_in_memory().await.unwrap();
        for i in 1..=5 {
            db.put_entry(&CacheKey::entity("works", format!("W{i}")), &json!({}), None)
                .await
                .unwrap();
        }
        assert_eq!(db.evict_lru_entries(10, 2).await.unwrap(), 0);
        assert_eq!(db.evict_lru_entries(4, 3).await.unwrap(), 3);
        assert_eq!(db.count_entries().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_clear_entries() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry(&CacheKey::collection("works"), &json!({"results": []}), None).await.unwrap();
        assert_eq!(db.clear_entries().await.unwrap(), 1);
        assert_eq!(db.count_entries().await.unwrap(), 0);
    }
}
