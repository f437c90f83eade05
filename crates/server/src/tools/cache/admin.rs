//! Cache administration tools: stats, clear, list and environment.

use std::collections::BTreeMap;

use alexcache_client::{TierKind, TieredCacheProvider};
use alexcache_core::{CacheKey, Error};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::resolve_resource_type;
use crate::tools::json_result;

/// Implementation of the cache_stats tool.
pub fn stats_impl(provider: &TieredCacheProvider) -> Result<CallToolResult, McpError> {
    json_result(&provider.get_cache_statistics())
}

/// Parameters for the cache_clear tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CacheClearParams {
    /// Only clear this resource type. Statistics are kept in that case.
    #[serde(default)]
    pub resource_type: Option<String>,
}

/// Output from the cache_clear tool.
#[derive(Debug, Clone, Serialize)]
pub struct CacheClearOutput {
    pub cleared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<u64>,
}

/// Implementation of the cache_clear tool.
pub async fn clear_impl(provider: &TieredCacheProvider, params: CacheClearParams) -> Result<CallToolResult, McpError> {
    let resource_type = params.resource_type.filter(|t| !t.trim().is_empty());
    let output = match resource_type {
        Some(resource_type) => {
            let resource_type = resolve_resource_type(&resource_type)?;
            let removed = provider.clear_type(&resource_type).await;
            CacheClearOutput { cleared: true, resource_type: Some(resource_type), removed: Some(removed) }
        }
        None => {
            provider.clear_cache().await;
            CacheClearOutput { cleared: true, resource_type: None, removed: None }
        }
    };
    json_result(&output)
}

/// Parameters for the cache_list tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheListParams {
    /// Resource type to enumerate, e.g. `works`.
    pub resource_type: String,
}

/// Output from the cache_list tool.
#[derive(Debug, Clone, Serialize)]
pub struct CacheListOutput {
    pub resource_type: String,
    pub tiers: BTreeMap<TierKind, Vec<CacheKey>>,
}

/// Implementation of the cache_list tool.
pub async fn list_impl(provider: &TieredCacheProvider, params: CacheListParams) -> Result<CallToolResult, McpError> {
    let resource_type = resolve_resource_type(&params.resource_type)?;

    let tiers = provider.list_cached(&resource_type).await;
    json_result(&CacheListOutput { resource_type, tiers })
}

/// Parameters for the cache_environment tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CacheEnvironmentParams {
    /// New base URL for the remote static origin.
    #[serde(default)]
    pub remote_base_url: Option<String>,
}

/// Implementation of the cache_environment tool.
pub async fn environment_impl(
    provider: &TieredCacheProvider, params: CacheEnvironmentParams,
) -> Result<CallToolResult, McpError> {
    if let Some(base) = params.remote_base_url {
        let parsed = url::Url::parse(base.trim()).map_err(|e| Error::InvalidInput(format!("remote_base_url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidInput("remote_base_url must use http or https".into()).into());
        }
        provider.reconfigure(Some(base)).await;
    }

    json_result(&provider.environment().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_provider;
    use serde_json::json;

    #[tokio::test]
    async fn test_stats() {
        let provider = test_provider();
        provider.get_static_data(&CacheKey::entity("works", "W1")).await;
        assert!(stats_impl(&provider).is_ok());
    }

    #[tokio::test]
    async fn test_clear_all_and_by_type() {
        let provider = test_provider();
        provider.set_static_data(&CacheKey::entity("works", "W1"), &json!({})).await;
        provider.set_static_data(&CacheKey::entity("authors", "A1"), &json!({})).await;

        let params = CacheClearParams { resource_type: Some("works".into()) };
        assert!(clear_impl(&provider, params).await.is_ok());
        assert!(!provider.has_static_data(&CacheKey::entity("works", "W1")).await);
        assert!(provider.has_static_data(&CacheKey::entity("authors", "A1")).await);

        assert!(clear_impl(&provider, CacheClearParams::default()).await.is_ok());
        assert!(!provider.has_static_data(&CacheKey::entity("authors", "A1")).await);
    }

    #[tokio::test]
    async fn test_clear_rejects_unknown_type() {
        let provider = test_provider();
        provider.set_static_data(&CacheKey::entity("works", "W1"), &json!({})).await;

        for resource_type in ["..", "../works", "widgets"] {
            let params = CacheClearParams { resource_type: Some(resource_type.into()) };
            assert!(clear_impl(&provider, params).await.is_err(), "accepted {resource_type}");
        }
        assert!(provider.has_static_data(&CacheKey::entity("works", "W1")).await);
    }

    #[tokio::test]
    async fn test_list_requires_type() {
        let provider = test_provider();
        assert!(list_impl(&provider, CacheListParams { resource_type: " ".into() }).await.is_err());
        assert!(list_impl(&provider, CacheListParams { resource_type: "..".into() }).await.is_err());
        assert!(list_impl(&provider, CacheListParams { resource_type: "works".into() }).await.is_ok());
    }

    #[tokio::test]
    async fn test_environment_reconfigure() {
        let provider = test_provider();
        assert!(environment_impl(&provider, CacheEnvironmentParams::default()).await.is_ok());

        let params = CacheEnvironmentParams { remote_base_url: Some("https://static.example.org/snapshots".into()) };
        assert!(environment_impl(&provider, params).await.is_ok());
        assert_eq!(
            provider.environment().await.remote_base_url.as_deref(),
            Some("https://static.example.org/snapshots/")
        );

        let params = CacheEnvironmentParams { remote_base_url: Some("file:///tmp".into()) };
        assert!(environment_impl(&provider, params).await.is_err());
    }
}
