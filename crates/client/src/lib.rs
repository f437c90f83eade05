//! Client code for alexcache.
//!
//! This crate provides the cache tiers, the static-origin HTTP client and the
//! tiered cache provider shared by the server and library callers.

pub mod provider;
pub mod tier;

pub use provider::{BYTES_SAVED_PER_HIT, Capabilities, CacheStatistics, EnvironmentInfo, Lookup, TieredCacheProvider};
pub use tier::{
    CacheTier, FilesystemTier, HttpOrigin, MemoryTier, OriginResponse, PersistentTier, RemoteTier, StaticOrigin,
    TierKind, TierOutcome, TierStats, TierStatsSnapshot,
};
