//! cache_lookup tool implementation.
//!
//! Looks an entry up across every tier. A miss is a normal result, not an
//! error: the caller decides whether to fetch live.

use alexcache_client::{Lookup, TierKind, TieredCacheProvider};
use alexcache_core::CacheKey;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::resolve_key;
use crate::tools::json_result;

/// Parameters for the cache_lookup tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheLookupParams {
    /// Request URL, e.g. `https://api.openalex.org/works/W2741809807`.
    #[serde(default)]
    pub url: Option<String>,

    /// Resource type (first path segment) when no URL is given.
    #[serde(default)]
    pub resource_type: Option<String>,

    /// Entity id or nested path under the resource type.
    #[serde(default)]
    pub id: Option<String>,
}

/// Output from the cache_lookup tool.
#[derive(Debug, Clone, Serialize)]
pub struct CacheLookupOutput {
    pub key: CacheKey,
    pub hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<TierKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Implementation of the cache_lookup tool.
pub async fn lookup_impl(
    provider: &TieredCacheProvider, params: CacheLookupParams,
) -> Result<CallToolResult, McpError> {
    let key = resolve_key(provider, params.url.as_deref(), params.resource_type.as_deref(), params.id.as_deref())?;

    let output = match provider.get_static_data(&key).await {
        Lookup::Hit { data, tier, load_time } => CacheLookupOutput {
            key,
            hit: true,
            tier: Some(tier),
            load_time_ms: Some(load_time.as_secs_f64() * 1000.0),
            data: Some(data),
        },
        Lookup::Miss => CacheLookupOutput { key, hit: false, tier: None, load_time_ms: None, data: None },
    };

    json_result(&output)
}
