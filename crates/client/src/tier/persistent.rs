//! Device-durable tier backed by the SQLite entry store.

use std::time::Instant;

use alexcache_core::config::PersistentConfig;
use alexcache_core::{CacheDb, CacheKey, Error};
use async_trait::async_trait;
use serde_json::Value;

use super::{CacheTier, TierKind, TierOutcome, TierStats};

/// Persistent tier with TTL expiry and batched LRU eviction.
#[derive(Debug)]
pub struct PersistentTier {
    db: CacheDb,
    config: PersistentConfig,
    stats: TierStats,
}

impl PersistentTier {
    pub fn new(db: CacheDb, config: PersistentConfig) -> Self {
        Self { db, config, stats: TierStats::default() }
    }

    pub fn config(&self) -> &PersistentConfig {
        &self.config
    }

    /// Delete expired entries.
    pub async fn sweep_expired(&self) -> Result<u64, Error> {
        let deleted = self.db.purge_expired_entries().await?;
        if deleted > 0 {
            tracing::debug!(deleted, "swept expired persistent entries");
        }
        Ok(deleted)
    }

    /// Run one eviction pass against the configured capacity.
    pub async fn evict_lru(&self) -> Result<u64, Error> {
        let deleted = self.db.evict_lru_entries(self.config.max_entries, self.config.eviction_batch_size).await?;
        if deleted > 0 {
            tracing::debug!(deleted, max_entries = self.config.max_entries, "evicted persistent entries");
        }
        Ok(deleted)
    }

    pub async fn len(&self) -> Result<u64, Error> {
        self.db.count_entries().await
    }
}

#[async_trait]
impl CacheTier for PersistentTier {
    fn kind(&self) -> TierKind {
        TierKind::Persistent
    }

    async fn get(&self, key: &CacheKey) -> TierOutcome {
        let start = Instant::now();
        let outcome = match self.db.get_entry(key).await {
            Ok(Some(entry)) => TierOutcome::Hit { data: entry.data, load_time: start.elapsed() },
            Ok(None) => TierOutcome::Miss,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "persistent tier read failed");
                TierOutcome::Error(e.to_string())
            }
        };
        self.stats.record(&outcome);
        outcome
    }

    async fn has(&self, key: &CacheKey) -> bool {
        match self.db.has_entry(key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "persistent tier lookup failed");
                false
            }
        }
    }

    async fn set(&self, key: &CacheKey, data: &Value) -> Result<(), Error> {
        self.db.put_entry(key, data, Some(self.config.default_ttl())).await?;
        self.evict_lru().await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), Error> {
        let deleted = self.db.clear_entries().await?;
        tracing::info!(deleted, "cleared persistent tier");
        Ok(())
    }

    async fn clear_type(&self, resource_type: &str) -> Result<u64, Error> {
        let deleted = self.db.delete_entries_by_type(resource_type).await?;
        tracing::info!(resource_type, deleted, "cleared persistent entries by type");
        Ok(deleted)
    }

    fn supports_write(&self) -> bool {
        true
    }

    async fn list(&self, resource_type: &str) -> Vec<CacheKey> {
        self.db.list_entries(Some(resource_type)).await.unwrap_or_else(|e| {
            tracing::debug!(resource_type, error = %e, "persistent tier enumeration failed");
            Vec::new()
        })
    }

    fn stats(&self) -> &TierStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn tier(config: PersistentConfig) -> PersistentTier {
        PersistentTier::new(CacheDb::open_in_memory().await.unwrap(), config)
    }

    #[tokio::test]
    async fn test_set_get_has() {
        let tier = tier(PersistentConfig::default()).await;
        let key = CacheKey::entity("authors", "A5017898742");
        tier.set(&key, &json!({"display_name": "A"})).await.unwrap();

        assert!(tier.has(&key).await);
        assert!(tier.get(&key).await.is_hit());
        assert_eq!(tier.get(&CacheKey::entity("authors", "A1")).await, TierOutcome::Miss);
        assert_eq!(tier.stats().snapshot().hits, 1);
    }

    #[tokio::test]
    async fn test_expired_entries_miss_and_sweep() {
        let config = PersistentConfig { default_ttl_secs: 0, ..PersistentConfig::default() };
        let tier = tier(config).await;
        let key = CacheKey::entity("works", "W1");
        tier.set(&key, &json!({})).await.unwrap();

        assert!(!tier.has(&key).await);
        assert_eq!(tier.get(&key).await, TierOutcome::Miss);
        assert_eq!(tier.sweep_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_eviction_on_write() {
        let config = PersistentConfig { max_entries: 4, eviction_batch_size: 2, ..PersistentConfig::default() };
        let tier = tier(config).await;
        for i in 1..=5 {
            tier.set(&CacheKey::entity("works", format!("W{i}")), &json!(i)).await.unwrap();
        }

        assert_eq!(tier.len().await.unwrap(), 3);
        assert!(!tier.has(&CacheKey::entity("works", "W1")).await);
        assert!(!tier.has(&CacheKey::entity("works", "W2")).await);
        assert!(tier.has(&CacheKey::entity("works", "W5")).await);
    }

    #[tokio::test]
    async fn test_clear_type_and_list() {
        let tier = tier(PersistentConfig::default()).await;
        tier.set(&CacheKey::entity("works", "W1"), &json!({})).await.unwrap();
        tier.set(&CacheKey::entity("topics", "T1"), &json!({})).await.unwrap();

        assert_eq!(tier.list("works").await, vec![CacheKey::entity("works", "W1")]);
        assert_eq!(tier.clear_type("works").await.unwrap(), 1);
        assert!(tier.list("works").await.is_empty());
        assert_eq!(tier.list("topics").await.len(), 1);

        tier.clear().await.unwrap();
        assert_eq!(tier.len().await.unwrap(), 0);
    }
}
