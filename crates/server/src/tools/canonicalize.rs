//! cache_canonicalize tool implementation.
//!
//! Shows how a request URL maps onto the cache without touching any tier.

use alexcache_client::TieredCacheProvider;
use alexcache_core::CacheKey;
use alexcache_core::key::are_equivalent;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::json_result;

/// Parameters for the cache_canonicalize tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CanonicalizeParams {
    /// Request URL to canonicalize.
    pub url: String,

    /// Second URL to compare against.
    #[serde(default)]
    pub compare_with: Option<String>,
}

/// Output from the cache_canonicalize tool.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalizeOutput {
    pub cacheable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<CacheKey>,
    /// Whether `compare_with` maps to the same cache entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equivalent: Option<bool>,
}

pub(crate) fn canonicalize(provider: &TieredCacheProvider, params: &CanonicalizeParams) -> CanonicalizeOutput {
    let canonical = provider.canonicalizer().parse(&params.url);
    let equivalent = params.compare_with.as_deref().map(|other| {
        let same_path = match (&canonical, provider.canonicalizer().canonical_path(other)) {
            (Some(c), Some(other_path)) => c.path == other_path,
            _ => false,
        };
        same_path && are_equivalent(&params.url, other)
    });

    CanonicalizeOutput {
        cacheable: canonical.is_some(),
        canonical_url: canonical.as_ref().map(|c| c.url()),
        path: canonical.as_ref().map(|c| c.path.clone()),
        key: canonical.as_ref().map(|c| c.cache_key()),
        equivalent,
    }
}

/// Implementation of the cache_canonicalize tool.
pub fn canonicalize_impl(
    provider: &TieredCacheProvider, params: CanonicalizeParams,
) -> Result<CallToolResult, McpError> {
    json_result(&canonicalize(provider, &params))
}
