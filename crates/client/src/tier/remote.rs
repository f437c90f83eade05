//! Remote tier reading pre-published snapshots from a static origin.
//!
//! ### Request shape
//! - `GET {base_url}{type}/{id}.json` (`{base_url}{type}.json` for collections)
//! - Bounded by the policy timeout
//!
//! ### Failure handling
//! - 404 is a definitive miss: no retry, no failure state.
//! - Any other failure retries with exponential backoff plus jitter, honoring
//!   a `Retry-After` hint when the origin sends one.
//! - Once retries are exhausted the URL enters a cooldown during which lookups
//!   miss without touching the network.
//!
//! Failure state is owned by the tier instance and never persisted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alexcache_core::config::{RetryPolicy, normalize_base_url};
use alexcache_core::{CacheKey, Error};
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use reqwest::{StatusCode, header};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use super::{CacheTier, TierKind, TierOutcome, TierStats};

/// Raw response from a static origin.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub status: u16,
    pub body: Bytes,
    /// Server-supplied delay before the next attempt.
    pub retry_after: Option<Duration>,
}

impl OriginResponse {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self { status: 200, body: body.into(), retry_after: None }
    }

    pub fn status(status: u16) -> Self {
        Self { status, body: Bytes::new(), retry_after: None }
    }
}

/// Transport for static snapshot fetches.
#[async_trait]
pub trait StaticOrigin: Send + Sync {
    /// Perform a GET.
    ///
    /// Non-success statuses are returned as responses; only transport
    /// failures are errors.
    async fn fetch(&self, url: &str) -> Result<OriginResponse, Error>;
}

/// reqwest-backed origin.
#[derive(Debug, Clone)]
pub struct HttpOrigin {
    http: reqwest::Client,
}

impl HttpOrigin {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::HttpError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

/// Seconds form of `Retry-After`; HTTP-date values are ignored.
fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl StaticOrigin for HttpOrigin {
    async fn fetch(&self, url: &str) -> Result<OriginResponse, Error> {
        let response = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::FetchTimeout(url.to_string())
                } else {
                    Error::HttpError(format!("network error: {e}"))
                }
            })?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = if status == StatusCode::NOT_FOUND {
            Bytes::new()
        } else {
            response
                .bytes()
                .await
                .map_err(|e| Error::HttpError(format!("failed to read response: {e}")))?
        };

        tracing::debug!(url, status = status.as_u16(), bytes = body.len(), "static origin response");

        Ok(OriginResponse { status: status.as_u16(), body, retry_after })
    }
}

/// Failure streak of one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureState {
    pub last_failure: Instant,
    pub attempts: u32,
    pub cooldown_until: Option<Instant>,
}

#[derive(Debug, Default)]
struct FailureTracker {
    states: Mutex<HashMap<String, FailureState>>,
}

impl FailureTracker {
    /// Remaining cooldown for a URL; expired cooldowns reset the streak.
    async fn cooldown_remaining(&self, url: &str, now: Instant) -> Option<Duration> {
        let mut states = self.states.lock().await;
        let until = states.get(url)?.cooldown_until?;
        if until > now {
            return Some(until - now);
        }
        states.remove(url);
        None
    }

    async fn record_failure(&self, url: &str, now: Instant) -> u32 {
        let mut states = self.states.lock().await;
        let state = states
            .entry(url.to_string())
            .or_insert(FailureState { last_failure: now, attempts: 0, cooldown_until: None });
        state.attempts += 1;
        state.last_failure = now;
        state.attempts
    }

    async fn start_cooldown(&self, url: &str, until: Instant) {
        if let Some(state) = self.states.lock().await.get_mut(url) {
            state.cooldown_until = Some(until);
        }
    }

    async fn clear(&self, url: &str) {
        self.states.lock().await.remove(url);
    }

    async fn clear_all(&self) {
        self.states.lock().await.clear();
    }

    async fn get(&self, url: &str) -> Option<FailureState> {
        self.states.lock().await.get(url).copied()
    }
}

enum Attempt {
    Found(Value),
    NotFound,
    Retryable { reason: String, hint: Option<Duration> },
    Fatal(String),
}

/// Remote static-file tier.
pub struct RemoteTier {
    origin: Arc<dyn StaticOrigin>,
    base_url: RwLock<Option<String>>,
    policy: RetryPolicy,
    failures: FailureTracker,
    stats: TierStats,
}

impl std::fmt::Debug for RemoteTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTier").field("policy", &self.policy).finish_non_exhaustive()
    }
}

impl RemoteTier {
    pub fn new(origin: Arc<dyn StaticOrigin>, base_url: Option<String>, policy: RetryPolicy) -> Self {
        Self {
            origin,
            base_url: RwLock::new(base_url.as_deref().map(normalize_base_url)),
            policy,
            failures: FailureTracker::default(),
            stats: TierStats::default(),
        }
    }

    pub async fn base_url(&self) -> Option<String> {
        self.base_url.read().await.clone()
    }

    /// Point the tier at another origin; failure state starts over.
    pub async fn set_base_url(&self, base_url: Option<String>) {
        let normalized = base_url.as_deref().map(normalize_base_url);
        tracing::info!(base_url = ?normalized, "remote tier reconfigured");
        *self.base_url.write().await = normalized;
        self.failures.clear_all().await;
    }

    /// Snapshot URL for a key, or `None` while no origin is configured.
    pub async fn url_for(&self, key: &CacheKey) -> Option<String> {
        let base = self.base_url.read().await;
        base.as_ref().map(|base| format!("{base}{}", key.relative_path()))
    }

    pub async fn failure_state(&self, key: &CacheKey) -> Option<FailureState> {
        let url = self.url_for(key).await?;
        self.failures.get(&url).await
    }

    async fn attempt(&self, url: &str) -> Attempt {
        match self.origin.fetch(url).await {
            Ok(response) if response.status == StatusCode::NOT_FOUND.as_u16() => Attempt::NotFound,
            Ok(response) if (200..300).contains(&response.status) => match serde_json::from_slice(&response.body) {
                Ok(data) => Attempt::Found(data),
                Err(e) => Attempt::Fatal(format!("malformed snapshot: {e}")),
            },
            Ok(response) => {
                Attempt::Retryable { reason: format!("status {}", response.status), hint: response.retry_after }
            }
            Err(e) => Attempt::Retryable { reason: e.to_string(), hint: None },
        }
    }

    fn jitter(&self) -> Duration {
        if self.policy.jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=self.policy.jitter_ms))
    }

    async fn fetch(&self, key: &CacheKey) -> TierOutcome {
        let Some(url) = self.url_for(key).await else {
            return TierOutcome::Miss;
        };

        if let Some(remaining) = self.failures.cooldown_remaining(&url, Instant::now()).await {
            tracing::debug!(url = %url, remaining_ms = remaining.as_millis() as u64, "remote tier cooling down");
            return TierOutcome::Miss;
        }

        let start = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(&url).await {
                Attempt::Found(data) => {
                    self.failures.clear(&url).await;
                    return TierOutcome::Hit { data, load_time: start.elapsed() };
                }
                Attempt::NotFound => return TierOutcome::Miss,
                Attempt::Fatal(reason) => {
                    tracing::debug!(url = %url, reason = %reason, "remote tier read failed");
                    return TierOutcome::Error(reason);
                }
                Attempt::Retryable { reason, hint } => {
                    let failures = self.failures.record_failure(&url, Instant::now()).await;
                    if attempt >= max_attempts {
                        self.failures.start_cooldown(&url, Instant::now() + self.policy.cooldown()).await;
                        tracing::warn!(
                            url = %url,
                            failures,
                            cooldown_ms = self.policy.cooldown_ms,
                            reason = %reason,
                            "remote tier retries exhausted"
                        );
                        return TierOutcome::Error(format!("retries exhausted: {reason}"));
                    }

                    let delay = self.policy.backoff(attempt, hint, self.jitter());
                    tracing::debug!(
                        url = %url,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "retrying remote fetch"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl CacheTier for RemoteTier {
    fn kind(&self) -> TierKind {
        TierKind::Remote
    }

    async fn get(&self, key: &CacheKey) -> TierOutcome {
        let outcome = self.fetch(key).await;
        self.stats.record(&outcome);
        outcome
    }

    /// A single request with no retries. Skipped during a cooldown, and a
    /// failure leaves the failure state untouched.
    async fn has(&self, key: &CacheKey) -> bool {
        let Some(url) = self.url_for(key).await else {
            return false;
        };
        if self.failures.cooldown_remaining(&url, Instant::now()).await.is_some() {
            return false;
        }
        matches!(self.attempt(&url).await, Attempt::Found(_))
    }

    /// Resets failure streaks; the origin itself is read-only.
    async fn clear(&self) -> Result<(), Error> {
        self.failures.clear_all().await;
        Ok(())
    }

    fn stats(&self) -> &TierStats {
        &self.stats
    }
}
