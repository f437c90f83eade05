//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (ALEXCACHE_*)
//! 2. TOML config file (if ALEXCACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Which durable tier the running process can use.
///
/// Chosen once when the provider is built. `Device` processes own a
/// device-local key/value store, `Server` processes can write to a local
/// directory tree, `Worker` processes get neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProfile {
    Device,
    Server,
    Worker,
}

impl std::fmt::Display for ExecutionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExecutionProfile::Device => "device",
            ExecutionProfile::Server => "server",
            ExecutionProfile::Worker => "worker",
        };
        f.write_str(name)
    }
}

/// Limits for the device-persistent tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentConfig {
    /// Maximum number of stored entries before LRU eviction kicks in.
    #[serde(default = "default_persistent_max_entries")]
    pub max_entries: usize,

    /// Time-to-live applied to entries written without an explicit TTL.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Number of least recently used entries removed per eviction pass.
    #[serde(default = "default_eviction_batch_size")]
    pub eviction_batch_size: usize,
}

/// Retry policy for the remote static-file tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per lookup, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubled for each further attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay, jitter included.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound of the random delay added to each backoff.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// How long a URL is skipped after its retries are exhausted.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Per-request timeout.
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (ALEXCACHE_*)
/// 2. TOML config file (if ALEXCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Execution profile deciding the durable tier.
    ///
    /// Set via ALEXCACHE_PROFILE environment variable.
    #[serde(default = "default_profile")]
    pub profile: ExecutionProfile,

    /// Base URL of the static snapshot origin. The remote tier stays inert
    /// until this is set.
    ///
    /// Set via ALEXCACHE_REMOTE_BASE_URL environment variable.
    #[serde(default)]
    pub remote_base_url: Option<String>,

    /// Root directory of the filesystem tier.
    ///
    /// Set via ALEXCACHE_CACHE_ROOT environment variable.
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    /// Path to the SQLite database behind the persistent tier.
    ///
    /// Set via ALEXCACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User-Agent string for static origin requests.
    ///
    /// Set via ALEXCACHE_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Capacity of the in-process memory tier.
    ///
    /// Set via ALEXCACHE_MEMORY_MAX_SIZE environment variable.
    #[serde(default = "default_memory_max_size")]
    pub memory_max_size: usize,

    /// Persistent tier limits (ALEXCACHE_PERSISTENT__*).
    #[serde(default)]
    pub persistent: PersistentConfig,

    /// Remote tier retry policy (ALEXCACHE_RETRY__*).
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Shortens retry delays and cooldowns for test runs.
    ///
    /// Set via ALEXCACHE_TEST_MODE environment variable.
    #[serde(default)]
    pub test_mode: bool,
}

fn default_profile() -> ExecutionProfile {
    ExecutionProfile::Server
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("./alexcache-data")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./alexcache.sqlite")
}

fn default_user_agent() -> String {
    "alexcache/0.1".into()
}

fn default_memory_max_size() -> usize {
    1000
}

fn default_persistent_max_entries() -> usize {
    5000
}

fn default_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_eviction_batch_size() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_cooldown_ms() -> u64 {
    5 * 60 * 1_000
}

fn default_remote_timeout_ms() -> u64 {
    10_000
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_entries: default_persistent_max_entries(),
            default_ttl_secs: default_ttl_secs(),
            eviction_batch_size: default_eviction_batch_size(),
        }
    }
}

impl PersistentConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            cooldown_ms: default_cooldown_ms(),
            timeout_ms: default_remote_timeout_ms(),
        }
    }
}

impl RetryPolicy {
    /// Policy with millisecond delays for tests; attempt count is unchanged.
    pub fn for_tests() -> Self {
        Self {
            base_delay_ms: 1,
            max_delay_ms: 10,
            jitter_ms: 0,
            cooldown_ms: 2_000,
            timeout_ms: 1_000,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Backoff before retrying after the given failed attempt (1-based).
    ///
    /// `base * 2^(attempt-1)`, replaced by `hint` when the server sent one,
    /// plus `jitter`, capped at `max_delay_ms`.
    pub fn backoff(&self, attempt: u32, hint: Option<Duration>, jitter: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let computed = Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << exponent));
        let delay = hint.unwrap_or(computed).saturating_add(jitter);
        delay.min(Duration::from_millis(self.max_delay_ms))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            remote_base_url: None,
            cache_root: default_cache_root(),
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            memory_max_size: default_memory_max_size(),
            persistent: PersistentConfig::default(),
            retry: RetryPolicy::default(),
            test_mode: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `ALEXCACHE_`
    /// 2. TOML file from `ALEXCACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("ALEXCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("ALEXCACHE_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Retry policy in effect, shortened when `test_mode` is on.
    pub fn effective_retry(&self) -> RetryPolicy {
        if self.test_mode {
            RetryPolicy { max_attempts: self.retry.max_attempts, ..RetryPolicy::for_tests() }
        } else {
            self.retry.clone()
        }
    }

    /// Remote base URL with a guaranteed trailing slash.
    pub fn normalized_remote_base_url(&self) -> Option<String> {
        self.remote_base_url.as_deref().map(normalize_base_url)
    }
}

/// Append the trailing slash `{base}{type}/{id}.json` relies on.
pub fn normalize_base_url(base: &str) -> String {
    let trimmed = base.trim();
    if trimmed.ends_with('/') { trimmed.to_string() } else { format!("{trimmed}/") }
}
