//! cache_store tool implementation.
//!
//! Writes a fetched response into memory and the durable tier.

use alexcache_client::{TierKind, TieredCacheProvider};
use alexcache_core::{CacheKey, Error};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::resolve_key;
use crate::tools::json_result;

/// Parameters for the cache_store tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheStoreParams {
    /// Request URL the response was fetched from. Preferred: the filesystem
    /// tier records it in its directory index.
    #[serde(default)]
    pub url: Option<String>,

    /// Resource type when no URL is given.
    #[serde(default)]
    pub resource_type: Option<String>,

    /// Entity id when no URL is given.
    #[serde(default)]
    pub id: Option<String>,

    /// Response body to cache.
    pub data: Value,
}

/// Output from the cache_store tool.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStoreOutput {
    pub key: CacheKey,
    pub path: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tiers: Vec<TierKind>,
}

/// Implementation of the cache_store tool.
pub async fn store_impl(
    provider: &TieredCacheProvider, params: CacheStoreParams,
) -> Result<CallToolResult, McpError> {
    let (key, tiers) = match params.url.as_deref() {
        Some(url) => {
            let key = provider
                .store_response(url, &params.data)
                .await
                .ok_or_else(|| Error::Uncacheable(url.to_string()))?;
            (key, Vec::new())
        }
        None => {
            let key = resolve_key(provider, None, params.resource_type.as_deref(), params.id.as_deref())?;
            let tiers = provider.set_static_data(&key, &params.data).await;
            (key, tiers)
        }
    };

    json_result(&CacheStoreOutput { path: key.relative_path(), key, tiers })
}
