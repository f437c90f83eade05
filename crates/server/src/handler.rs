//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the cache tool implementations.
use std::sync::Arc;

use alexcache_client::TieredCacheProvider;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

use crate::tools::cache::{
    CacheClearParams, CacheEnvironmentParams, CacheListParams, CacheLookupParams, CacheStoreParams, clear_impl,
    environment_impl, list_impl, lookup_impl, stats_impl, store_impl,
};
use crate::tools::canonicalize::{CanonicalizeParams, canonicalize_impl};

/// The main MCP server handler for mcp-alexcache.
#[derive(Clone)]
pub struct AlexCacheServer {
    provider: Arc<TieredCacheProvider>,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl AlexCacheServer {
    /// Create a new server handler around a shared provider.
    pub fn new(provider: Arc<TieredCacheProvider>) -> Self {
        Self { provider, tool_router: Self::tool_router() }
    }

    /// Look up a cached API response.
    #[tool(description = "Look up a cached API response by URL or by resource type and id. A miss means fetch live.")]
    async fn cache_lookup(&self, params: Parameters<CacheLookupParams>) -> Result<CallToolResult, McpError> {
        lookup_impl(&self.provider, params.0).await
    }

    /// Store a fetched API response.
    #[tool(description = "Store a fetched API response under its canonical key. api_key and mailto are ignored.")]
    async fn cache_store(&self, params: Parameters<CacheStoreParams>) -> Result<CallToolResult, McpError> {
        store_impl(&self.provider, params.0).await
    }

    #[tool(description = "Report request, hit and load-time statistics per tier and in aggregate.")]
    async fn cache_stats(&self) -> Result<CallToolResult, McpError> {
        stats_impl(&self.provider)
    }

    #[tool(description = "Clear every cache tier, or only one resource type.")]
    async fn cache_clear(&self, params: Parameters<CacheClearParams>) -> Result<CallToolResult, McpError> {
        clear_impl(&self.provider, params.0).await
    }

    #[tool(description = "List cached keys of one resource type, per tier.")]
    async fn cache_list(&self, params: Parameters<CacheListParams>) -> Result<CallToolResult, McpError> {
        list_impl(&self.provider, params.0).await
    }

    /// Describe the active tiers, optionally repointing the remote tier first.
    #[tool(
        description = "Describe the profile, active tiers and remote origin. remote_base_url repoints the remote tier."
    )]
    async fn cache_environment(&self, params: Parameters<CacheEnvironmentParams>) -> Result<CallToolResult, McpError> {
        environment_impl(&self.provider, params.0).await
    }

    #[tool(
        description = "Show the canonical cache path and URL of a request URL, and whether a second URL is equivalent."
    )]
    async fn cache_canonicalize(&self, params: Parameters<CanonicalizeParams>) -> Result<CallToolResult, McpError> {
        canonicalize_impl(&self.provider, params.0)
    }
}

impl ServerHandler for AlexCacheServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "mcp-alexcache".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
