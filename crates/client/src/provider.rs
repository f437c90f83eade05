//! Tiered cache provider.
//!
//! Lookups walk the tiers fastest first: memory, then the durable tier the
//! execution profile allows (persistent for `device`, filesystem for
//! `server`, none for `worker`), then the remote static origin. A hit is
//! copied into every faster writable tier before it is returned. Exhausting
//! every tier is a miss recorded against the synthetic `origin` bucket; the
//! caller decides whether to fetch live.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alexcache_core::{AppConfig, CacheDb, CacheKey, Error, ExecutionProfile, UrlCanonicalizer};
use serde::Serialize;
use serde_json::Value;

use crate::tier::{
    CacheTier, FilesystemTier, HttpOrigin, MemoryTier, PersistentTier, RemoteTier, StaticOrigin, TierKind,
    TierOutcome, TierStats, TierStatsSnapshot,
};

/// Estimated response size a hit saves from the network.
pub const BYTES_SAVED_PER_HIT: u64 = 2048;

/// Name of the statistics bucket that counts total misses.
pub const ORIGIN_BUCKET: &str = "origin";

/// Storage available to the process, decided once at construction.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub profile: ExecutionProfile,
    /// Filesystem tier root; used by the `server` profile.
    pub cache_root: Option<PathBuf>,
    /// Entry store; used by the `device` profile.
    pub database: Option<CacheDb>,
    pub remote_base_url: Option<String>,
}

impl Capabilities {
    pub fn worker(remote_base_url: Option<String>) -> Self {
        Self { profile: ExecutionProfile::Worker, cache_root: None, database: None, remote_base_url }
    }
}

/// Result of a provider lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Hit { data: Value, tier: TierKind, load_time: Duration },
    Miss,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit { .. })
    }

    pub fn into_data(self) -> Option<Value> {
        match self {
            Lookup::Hit { data, .. } => Some(data),
            Lookup::Miss => None,
        }
    }
}

/// Aggregate statistics across every tier.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatistics {
    pub total_requests: u64,
    pub total_hits: u64,
    pub hit_rate: f64,
    pub average_load_time_ms: f64,
    pub bandwidth_saved_bytes: u64,
    /// Per-tier counters plus the `origin` miss bucket.
    pub tiers: BTreeMap<String, TierStatsSnapshot>,
}

/// Runtime introspection.
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentInfo {
    pub profile: ExecutionProfile,
    pub active_tiers: Vec<TierKind>,
    pub remote_base_url: Option<String>,
    pub local_tier_available: bool,
}

#[derive(Debug, Default)]
struct GlobalStats {
    requests: AtomicU64,
    hits: AtomicU64,
    load_time_micros: AtomicU64,
}

impl GlobalStats {
    fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.load_time_micros.store(0, Ordering::Relaxed);
    }
}

/// Multi-tier cache in front of the scholarly-metadata API.
#[derive(Debug)]
pub struct TieredCacheProvider {
    profile: ExecutionProfile,
    tiers: Vec<Arc<dyn CacheTier>>,
    filesystem: Option<Arc<FilesystemTier>>,
    remote: Option<Arc<RemoteTier>>,
    canonicalizer: UrlCanonicalizer,
    global: GlobalStats,
    origin: TierStats,
}

impl TieredCacheProvider {
    /// Build the provider for a loaded configuration.
    ///
    /// The `device` profile opens the SQLite store at `db_path`, the `server`
    /// profile uses `cache_root` for the filesystem tier.
    pub async fn new(config: &AppConfig) -> Result<Self, Error> {
        let retry = config.effective_retry();
        let origin = Arc::new(HttpOrigin::new(&config.user_agent, retry.timeout())?);

        let capabilities = match config.profile {
            ExecutionProfile::Device => Capabilities {
                profile: ExecutionProfile::Device,
                cache_root: None,
                database: Some(CacheDb::open(&config.db_path).await?),
                remote_base_url: config.normalized_remote_base_url(),
            },
            ExecutionProfile::Server => Capabilities {
                profile: ExecutionProfile::Server,
                cache_root: Some(config.cache_root.clone()),
                database: None,
                remote_base_url: config.normalized_remote_base_url(),
            },
            ExecutionProfile::Worker => Capabilities::worker(config.normalized_remote_base_url()),
        };

        Ok(Self::from_capabilities(capabilities, config, origin))
    }

    /// Build the provider from explicit capabilities and an origin.
    pub fn from_capabilities(capabilities: Capabilities, config: &AppConfig, origin: Arc<dyn StaticOrigin>) -> Self {
        let canonicalizer = UrlCanonicalizer::default();
        let mut tiers: Vec<Arc<dyn CacheTier>> = vec![Arc::new(MemoryTier::new(config.memory_max_size))];
        let mut filesystem = None;

        match capabilities.profile {
            ExecutionProfile::Device => match capabilities.database {
                Some(db) => tiers.push(Arc::new(PersistentTier::new(db, config.persistent.clone()))),
                None => tracing::warn!("device profile without a database, persistent tier disabled"),
            },
            ExecutionProfile::Server => {
                let tier = Arc::new(FilesystemTier::new(capabilities.cache_root, canonicalizer.clone()));
                if tier.is_available() {
                    tiers.push(tier.clone());
                    filesystem = Some(tier);
                } else {
                    tracing::warn!("server profile without a cache root, filesystem tier disabled");
                }
            }
            ExecutionProfile::Worker => {}
        }

        let remote = Arc::new(RemoteTier::new(origin, capabilities.remote_base_url, config.effective_retry()));
        tiers.push(remote.clone());

        tracing::info!(
            profile = %capabilities.profile,
            tiers = ?tiers.iter().map(|t| t.kind()).collect::<Vec<_>>(),
            "cache provider ready"
        );

        Self {
            profile: capabilities.profile,
            tiers,
            filesystem,
            remote: Some(remote),
            canonicalizer,
            global: GlobalStats::default(),
            origin: TierStats::default(),
        }
    }

    /// Build a provider over an explicit tier list, fastest first.
    pub fn with_tiers(profile: ExecutionProfile, tiers: Vec<Arc<dyn CacheTier>>) -> Self {
        Self {
            profile,
            tiers,
            filesystem: None,
            remote: None,
            canonicalizer: UrlCanonicalizer::default(),
            global: GlobalStats::default(),
            origin: TierStats::default(),
        }
    }

    pub fn canonicalizer(&self) -> &UrlCanonicalizer {
        &self.canonicalizer
    }

    /// Look a key up across tiers, promoting hits into faster tiers.
    pub async fn get_static_data(&self, key: &CacheKey) -> Lookup {
        self.global.requests.fetch_add(1, Ordering::Relaxed);

        for (position, tier) in self.tiers.iter().enumerate() {
            match tier.get(key).await {
                TierOutcome::Hit { data, load_time } => {
                    self.promote(key, &data, &self.tiers[..position]).await;

                    self.global.hits.fetch_add(1, Ordering::Relaxed);
                    self.global
                        .load_time_micros
                        .fetch_add(load_time.as_micros().min(u64::MAX as u128) as u64, Ordering::Relaxed);

                    tracing::debug!(
                        key = %key,
                        tier = %tier.kind(),
                        load_ms = load_time.as_millis() as u64,
                        "cache hit"
                    );
                    return Lookup::Hit { data, tier: tier.kind(), load_time };
                }
                TierOutcome::Miss => {}
                TierOutcome::Error(reason) => {
                    tracing::debug!(key = %key, tier = %tier.kind(), reason = %reason, "tier failed, treating as miss");
                }
            }
        }

        self.origin.record_miss();
        tracing::debug!(key = %key, "cache miss on every tier");
        Lookup::Miss
    }

    async fn promote(&self, key: &CacheKey, data: &Value, faster: &[Arc<dyn CacheTier>]) {
        for tier in faster.iter().filter(|t| t.supports_write()) {
            if let Err(e) = tier.set(key, data).await {
                tracing::warn!(key = %key, tier = %tier.kind(), error = %e, "promotion failed");
            }
        }
    }

    /// Whether any tier holds the key. Does not promote or count.
    ///
    /// The remote tier answers with at most one origin request and none
    /// while it is cooling down.
    pub async fn has_static_data(&self, key: &CacheKey) -> bool {
        for tier in &self.tiers {
            if tier.has(key).await {
                return true;
            }
        }
        false
    }

    /// Write into memory and the durable tier. Failures are logged.
    ///
    /// Returns the tiers that accepted the write.
    pub async fn set_static_data(&self, key: &CacheKey, data: &Value) -> Vec<TierKind> {
        let mut written = Vec::new();
        for tier in self.tiers.iter().filter(|t| t.supports_write()) {
            match tier.set(key, data).await {
                Ok(()) => written.push(tier.kind()),
                Err(e) => tracing::warn!(key = %key, tier = %tier.kind(), error = %e, "tier write failed"),
            }
        }
        written
    }

    /// Look up a request URL. Uncacheable URLs are a miss.
    pub async fn get_by_url(&self, url: &str) -> Lookup {
        match self.canonicalizer.cache_key(url) {
            Some(key) => self.get_static_data(&key).await,
            None => {
                tracing::debug!(url, "uncacheable URL");
                Lookup::Miss
            }
        }
    }

    /// Store a fetched response under its request URL.
    ///
    /// The filesystem tier records the URL in its directory index. Returns
    /// the key written, or `None` if the URL is uncacheable.
    pub async fn store_response(&self, url: &str, data: &Value) -> Option<CacheKey> {
        let key = self.canonicalizer.cache_key(url)?;

        for tier in self.tiers.iter().filter(|t| t.supports_write()) {
            let result = match (&self.filesystem, tier.kind()) {
                (Some(fs), TierKind::Filesystem) => fs.store_response(url, data).await.map(|_| ()),
                _ => tier.set(&key, data).await,
            };
            if let Err(e) = result {
                tracing::warn!(url, tier = %tier.kind(), error = %e, "tier write failed");
            }
        }
        Some(key)
    }

    /// Clear every tier and reset statistics.
    pub async fn clear_cache(&self) {
        for tier in &self.tiers {
            if let Err(e) = tier.clear().await {
                tracing::warn!(tier = %tier.kind(), error = %e, "tier clear failed");
            }
            tier.stats().reset();
        }
        self.global.reset();
        self.origin.reset();
        tracing::info!("cache cleared");
    }

    /// Drop one resource type from every tier; statistics are kept.
    ///
    /// Returns the number of entries removed across tiers.
    pub async fn clear_type(&self, resource_type: &str) -> u64 {
        let mut removed = 0;
        for tier in &self.tiers {
            match tier.clear_type(resource_type).await {
                Ok(count) => removed += count,
                Err(e) => tracing::warn!(resource_type, tier = %tier.kind(), error = %e, "tier clear failed"),
            }
        }
        removed
    }

    pub fn get_cache_statistics(&self) -> CacheStatistics {
        let total_requests = self.global.requests.load(Ordering::Relaxed);
        let total_hits = self.global.hits.load(Ordering::Relaxed);
        let load_time_micros = self.global.load_time_micros.load(Ordering::Relaxed);

        let mut tiers: BTreeMap<String, TierStatsSnapshot> =
            self.tiers.iter().map(|t| (t.kind().to_string(), t.stats().snapshot())).collect();
        tiers.insert(ORIGIN_BUCKET.to_string(), self.origin.snapshot());

        CacheStatistics {
            total_requests,
            total_hits,
            hit_rate: if total_requests == 0 { 0.0 } else { total_hits as f64 / total_requests as f64 },
            average_load_time_ms: if total_hits == 0 {
                0.0
            } else {
                load_time_micros as f64 / total_hits as f64 / 1000.0
            },
            bandwidth_saved_bytes: total_hits * BYTES_SAVED_PER_HIT,
            tiers,
        }
    }

    /// Keys cached per tier for one resource type.
    pub async fn list_cached(&self, resource_type: &str) -> BTreeMap<TierKind, Vec<CacheKey>> {
        let mut listing = BTreeMap::new();
        for tier in &self.tiers {
            listing.insert(tier.kind(), tier.list(resource_type).await);
        }
        listing
    }

    pub async fn environment(&self) -> EnvironmentInfo {
        let active_tiers: Vec<TierKind> = self.tiers.iter().map(|t| t.kind()).collect();
        let remote_base_url = match &self.remote {
            Some(remote) => remote.base_url().await,
            None => None,
        };
        EnvironmentInfo {
            profile: self.profile,
            local_tier_available: active_tiers.iter().any(|k| matches!(k, TierKind::Persistent | TierKind::Filesystem)),
            active_tiers,
            remote_base_url,
        }
    }

    /// Point the remote tier at another origin without rebuilding the provider.
    pub async fn reconfigure(&self, remote_base_url: Option<String>) {
        match &self.remote {
            Some(remote) => remote.set_base_url(remote_base_url).await,
            None => tracing::warn!("provider has no remote tier to reconfigure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::OriginResponse;
    use crate::tier::remote::tests::ScriptedOrigin;
    use alexcache_core::config::RetryPolicy;
    use serde_json::json;

    fn test_config() -> AppConfig {
        AppConfig { retry: RetryPolicy::for_tests(), ..AppConfig::default() }
    }

    fn key() -> CacheKey {
        CacheKey::entity("works", "W2741809807")
    }

    #[tokio::test]
    async fn test_remote_hit_is_promoted_into_memory() {
        let memory = Arc::new(MemoryTier::default());
        let origin = Arc::new(ScriptedOrigin::new(OriginResponse::ok(r#"{"id":"W2741809807"}"#)));
        let remote =
            Arc::new(RemoteTier::new(origin, Some("https://static.example.org/".into()), RetryPolicy::for_tests()));
        let tiers: Vec<Arc<dyn CacheTier>> = vec![memory.clone(), remote];
        let provider = TieredCacheProvider::with_tiers(ExecutionProfile::Worker, tiers);

        let lookup = provider.get_static_data(&key()).await;
        match &lookup {
            Lookup::Hit { data, tier, .. } => {
                assert_eq!(*tier, TierKind::Remote);
                assert_eq!(data["id"], "W2741809807");
            }
            Lookup::Miss => panic!("expected hit"),
        }
        assert!(memory.has(&key()).await);

        match provider.get_static_data(&key()).await {
            Lookup::Hit { tier, .. } => assert_eq!(tier, TierKind::Memory),
            Lookup::Miss => panic!("expected memory hit"),
        }
    }

    #[tokio::test]
    async fn test_miss_counts_against_origin() {
        let origin = Arc::new(ScriptedOrigin::new(OriginResponse::status(404)));
        let provider = TieredCacheProvider::from_capabilities(
            Capabilities::worker(Some("https://static.example.org".into())),
            &test_config(),
            origin,
        );

        assert_eq!(provider.get_static_data(&key()).await, Lookup::Miss);

        let stats = provider.get_cache_statistics();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.total_hits, 0);
        assert_eq!(stats.tiers[ORIGIN_BUCKET].requests, 1);
        assert_eq!(stats.tiers["memory"].requests, 1);
        assert_eq!(stats.tiers["remote"].requests, 1);
    }

    #[tokio::test]
    async fn test_statistics_and_clear() {
        let origin = Arc::new(ScriptedOrigin::new(OriginResponse::status(404)));
        let provider = TieredCacheProvider::from_capabilities(Capabilities::worker(None), &test_config(), origin);

        let written = provider.set_static_data(&key(), &json!({"id": 1})).await;
        assert_eq!(written, vec![TierKind::Memory]);
        assert!(provider.has_static_data(&key()).await);

        provider.get_static_data(&key()).await;
        provider.get_static_data(&CacheKey::entity("works", "W1")).await;

        let stats = provider.get_cache_statistics();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.total_hits, 1);
        assert_eq!(stats.hit_rate, 0.5);
        assert_eq!(stats.bandwidth_saved_bytes, BYTES_SAVED_PER_HIT);

        provider.clear_cache().await;
        assert!(!provider.has_static_data(&key()).await);
        let stats = provider.get_cache_statistics();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.tiers["memory"].hits, 0);
    }

    #[tokio::test]
    async fn test_tier_errors_fall_through() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("works")).await.unwrap();
        tokio::fs::write(dir.path().join("works/W2741809807.json"), b"{broken").await.unwrap();

        let origin = Arc::new(ScriptedOrigin::new(OriginResponse::ok(r#"{"id":"remote"}"#)));
        let capabilities = Capabilities {
            profile: ExecutionProfile::Server,
            cache_root: Some(dir.path().to_path_buf()),
            database: None,
            remote_base_url: Some("https://static.example.org".into()),
        };
        let provider = TieredCacheProvider::from_capabilities(capabilities, &test_config(), origin);

        match provider.get_static_data(&key()).await {
            Lookup::Hit { tier, data, .. } => {
                assert_eq!(tier, TierKind::Remote);
                assert_eq!(data["id"], "remote");
            }
            Lookup::Miss => panic!("expected remote hit"),
        }

        // promoted over the broken file
        let written = tokio::fs::read_to_string(dir.path().join("works/W2741809807.json")).await.unwrap();
        assert!(written.contains("remote"));
    }

    #[tokio::test]
    async fn test_device_profile_uses_persistent_tier() {
        let origin = Arc::new(ScriptedOrigin::new(OriginResponse::status(404)));
        let capabilities = Capabilities {
            profile: ExecutionProfile::Device,
            cache_root: None,
            database: Some(CacheDb::open_in_memory().await.unwrap()),
            remote_base_url: None,
        };
        let provider = TieredCacheProvider::from_capabilities(capabilities, &test_config(), origin);

        let env = provider.environment().await;
        assert_eq!(env.active_tiers, vec![TierKind::Memory, TierKind::Persistent, TierKind::Remote]);
        assert!(env.local_tier_available);
        assert!(env.remote_base_url.is_none());

        provider.set_static_data(&key(), &json!({"id": 1})).await;
        let listing = provider.list_cached("works").await;
        assert_eq!(listing[&TierKind::Persistent], vec![key()]);
        assert_eq!(listing[&TierKind::Memory], vec![key()]);
        assert!(listing[&TierKind::Remote].is_empty());

        assert_eq!(provider.clear_type("works").await, 2);
        assert!(!provider.has_static_data(&key()).await);
    }

    #[tokio::test]
    async fn test_store_response_and_get_by_url() {
        let dir = tempfile::tempdir().unwrap();
        let origin = Arc::new(ScriptedOrigin::new(OriginResponse::status(404)));
        let capabilities = Capabilities {
            profile: ExecutionProfile::Server,
            cache_root: Some(dir.path().to_path_buf()),
            database: None,
            remote_base_url: None,
        };
        let provider = TieredCacheProvider::from_capabilities(capabilities, &test_config(), origin);

        let url = "https://api.openalex.org/works?filter=type:article&mailto=me@example.com";
        let key = provider.store_response(url, &json!({"results": []})).await.unwrap();
        assert!(dir.path().join(key.relative_path()).exists());
        assert!(dir.path().join("works/queries/index.json").exists());

        let lookup = provider.get_by_url("https://api.openalex.org/works?filter=type:article&api_key=K").await;
        assert!(lookup.is_hit());

        assert!(provider.store_response("https://example.com/x", &json!({})).await.is_none());
        assert_eq!(provider.get_by_url("not a url").await, Lookup::Miss);
    }

    #[tokio::test]
    async fn test_reconfigure_remote() {
        let origin = Arc::new(ScriptedOrigin::new(OriginResponse::ok("{}")));
        let provider = TieredCacheProvider::from_capabilities(Capabilities::worker(None), &test_config(), origin);
        assert!(provider.environment().await.remote_base_url.is_none());
        assert_eq!(provider.get_static_data(&key()).await, Lookup::Miss);

        provider.reconfigure(Some("https://static.example.org/v2".into())).await;
        let env = provider.environment().await;
        assert_eq!(env.remote_base_url.as_deref(), Some("https://static.example.org/v2/"));
        assert!(!env.local_tier_available);
        assert!(provider.get_static_data(&key()).await.is_hit());
    }
}
