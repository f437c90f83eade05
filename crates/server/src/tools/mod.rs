//! MCP tool implementations.
//!
//! This module contains all tools exposed by the mcp-alexcache server.

pub mod cache;
pub mod canonicalize;

use alexcache_core::Error;
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

/// Serialize a tool output as pretty JSON text content.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Worker-profile provider with an unset remote origin; never touches the network.
#[cfg(test)]
pub(crate) fn test_provider() -> alexcache_client::TieredCacheProvider {
    use alexcache_client::{Capabilities, HttpOrigin, TieredCacheProvider};
    use alexcache_core::AppConfig;
    use std::sync::Arc;
    use std::time::Duration;

    let origin = Arc::new(HttpOrigin::new("alexcache-test", Duration::from_secs(1)).unwrap());
    TieredCacheProvider::from_capabilities(Capabilities::worker(None), &AppConfig::default(), origin)
}
