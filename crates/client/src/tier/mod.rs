//! Cache tiers behind one lookup contract.
//!
//! Tiers never fail a read: every lookup ends in a [`TierOutcome`], and the
//! provider treats [`TierOutcome::Error`] as a miss while keeping the reason
//! for diagnostics.

pub mod filesystem;
pub mod memory;
pub mod persistent;
pub mod remote;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alexcache_core::{CacheKey, Error};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use filesystem::FilesystemTier;
pub use memory::MemoryTier;
pub use persistent::PersistentTier;
pub use remote::{FailureState, HttpOrigin, OriginResponse, RemoteTier, StaticOrigin};

/// Storage medium of a tier, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Memory,
    Persistent,
    Filesystem,
    Remote,
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TierKind::Memory => "memory",
            TierKind::Persistent => "persistent",
            TierKind::Filesystem => "filesystem",
            TierKind::Remote => "remote",
        };
        f.write_str(name)
    }
}

/// Result of a single tier lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum TierOutcome {
    Hit { data: Value, load_time: Duration },
    Miss,
    /// The tier failed; callers fall through as on a miss.
    Error(String),
}

impl TierOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, TierOutcome::Hit { .. })
    }
}

/// Request counters of one tier.
#[derive(Debug, Default)]
pub struct TierStats {
    requests: AtomicU64,
    hits: AtomicU64,
    load_time_micros: AtomicU64,
}

/// Point-in-time copy of [`TierStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TierStatsSnapshot {
    pub requests: u64,
    pub hits: u64,
    pub hit_rate: f64,
    pub average_load_time_ms: f64,
}

impl TierStats {
    pub fn record_hit(&self, load_time: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.load_time_micros
            .fetch_add(load_time.as_micros().min(u64::MAX as u128) as u64, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an outcome; errors count as misses.
    pub fn record(&self, outcome: &TierOutcome) {
        match outcome {
            TierOutcome::Hit { load_time, .. } => self.record_hit(*load_time),
            TierOutcome::Miss | TierOutcome::Error(_) => self.record_miss(),
        }
    }

    pub fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.load_time_micros.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TierStatsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        let load_time_micros = self.load_time_micros.load(Ordering::Relaxed);
        TierStatsSnapshot {
            requests,
            hits,
            hit_rate: if requests == 0 { 0.0 } else { hits as f64 / requests as f64 },
            average_load_time_ms: if hits == 0 { 0.0 } else { load_time_micros as f64 / hits as f64 / 1000.0 },
        }
    }
}

/// One storage medium behind the tiered provider.
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn kind(&self) -> TierKind;

    /// Look up a key, recording the request in this tier's stats.
    async fn get(&self, key: &CacheKey) -> TierOutcome;

    async fn has(&self, key: &CacheKey) -> bool;

    /// Store a payload.
    ///
    /// # Errors
    ///
    /// Read-only tiers return `TierUnavailable`.
    async fn set(&self, key: &CacheKey, _data: &Value) -> Result<(), Error> {
        Err(Error::TierUnavailable(format!("{} tier is read-only", self.kind())))
    }

    /// Drop everything this tier holds.
    async fn clear(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Drop every entry of one resource type; returns how many were removed.
    async fn clear_type(&self, _resource_type: &str) -> Result<u64, Error> {
        Ok(0)
    }

    fn supports_write(&self) -> bool {
        false
    }

    /// Keys currently held for a resource type.
    async fn list(&self, _resource_type: &str) -> Vec<CacheKey> {
        Vec::new()
    }

    fn stats(&self) -> &TierStats;
}

impl fmt::Debug for dyn CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheTier({})", self.kind())
    }
}
