//! Bounded in-process tier with single-entry LRU eviction.

use std::collections::HashMap;
use std::time::Instant;

use alexcache_core::{CacheKey, Error};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{CacheTier, TierKind, TierOutcome, TierStats};

/// Default number of entries held in memory.
pub const DEFAULT_MAX_SIZE: usize = 1000;

#[derive(Debug)]
struct MemoryEntry {
    data: Value,
    last_touched: u64,
    access_count: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<CacheKey, MemoryEntry>,
    /// Logical clock; strictly increasing per touch so eviction order is exact.
    tick: u64,
}

impl MemoryState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Remove the single least recently touched entry.
    fn evict_one(&mut self) -> Option<CacheKey> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_touched)
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&oldest);
        Some(oldest)
    }
}

/// In-memory tier.
#[derive(Debug)]
pub struct MemoryTier {
    state: Mutex<MemoryState>,
    max_size: usize,
    stats: TierStats,
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE)
    }
}

impl MemoryTier {
    pub fn new(max_size: usize) -> Self {
        Self { state: Mutex::new(MemoryState::default()), max_size: max_size.max(1), stats: TierStats::default() }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of reads served for a key.
    pub async fn access_count(&self, key: &CacheKey) -> Option<u64> {
        self.state.lock().await.entries.get(key).map(|e| e.access_count)
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    async fn get(&self, key: &CacheKey) -> TierOutcome {
        let start = Instant::now();
        let mut state = self.state.lock().await;
        let tick = state.next_tick();
        let outcome = match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_touched = tick;
                entry.access_count += 1;
                TierOutcome::Hit { data: entry.data.clone(), load_time: start.elapsed() }
            }
            None => TierOutcome::Miss,
        };
        drop(state);

        self.stats.record(&outcome);
        outcome
    }

    async fn has(&self, key: &CacheKey) -> bool {
        self.state.lock().await.entries.contains_key(key)
    }

    async fn set(&self, key: &CacheKey, data: &Value) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let tick = state.next_tick();
        state
            .entries
            .insert(key.clone(), MemoryEntry { data: data.clone(), last_touched: tick, access_count: 0 });

        if state.entries.len() > self.max_size
            && let Some(evicted) = state.evict_one()
        {
            tracing::debug!(key = %evicted, max_size = self.max_size, "evicted least recently used memory entry");
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), Error> {
        self.state.lock().await.entries.clear();
        Ok(())
    }

    async fn clear_type(&self, resource_type: &str) -> Result<u64, Error> {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|key, _| key.resource_type != resource_type);
        Ok((before - state.entries.len()) as u64)
    }

    fn supports_write(&self) -> bool {
        true
    }

    async fn list(&self, resource_type: &str) -> Vec<CacheKey> {
        let state = self.state.lock().await;
        let mut keys: Vec<CacheKey> =
            state.entries.keys().filter(|k| k.resource_type == resource_type).cloned().collect();
        keys.sort();
        keys
    }

    fn stats(&self) -> &TierStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn work(i: usize) -> CacheKey {
        CacheKey::entity("works", format!("W{i}"))
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let tier = MemoryTier::default();
        tier.set(&work(1), &json!({"id": "W1"})).await.unwrap();

        match tier.get(&work(1)).await {
            TierOutcome::Hit { data, .. } => assert_eq!(data, json!({"id": "W1"})),
            other => panic!("expected hit, got {other:?}"),
        }
        assert_eq!(tier.get(&work(2)).await, TierOutcome::Miss);
        assert_eq!(tier.access_count(&work(1)).await, Some(1));

        let stats = tier.stats().snapshot();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_overflow_evicts_single_lru_entry() {
        let tier = MemoryTier::new(1000);
        for i in 0..1001 {
            tier.set(&work(i), &json!(i)).await.unwrap();
        }

        assert_eq!(tier.len().await, 1000);
        assert!(!tier.has(&work(0)).await);
        assert!(tier.has(&work(1)).await);
        assert!(tier.has(&work(1000)).await);
    }

    #[tokio::test]
    async fn test_read_refreshes_recency() {
        let tier = MemoryTier::new(2);
        tier.set(&work(1), &json!(1)).await.unwrap();
        tier.set(&work(2), &json!(2)).await.unwrap();
        tier.get(&work(1)).await;
        tier.set(&work(3), &json!(3)).await.unwrap();

        assert!(tier.has(&work(1)).await);
        assert!(!tier.has(&work(2)).await);
        assert!(tier.has(&work(3)).await);
    }

    #[tokio::test]
    async fn test_list_and_clear() {
        let tier = MemoryTier::default();
        tier.set(&work(2), &json!(2)).await.unwrap();
        tier.set(&work(1), &json!(1)).await.unwrap();
        tier.set(&CacheKey::entity("authors", "A1"), &json!({})).await.unwrap();

        assert_eq!(tier.list("works").await, vec![work(1), work(2)]);
        assert_eq!(tier.clear_type("works").await.unwrap(), 2);
        assert_eq!(tier.len().await, 1);

        tier.clear().await.unwrap();
        assert!(tier.is_empty().await);
    }
}
