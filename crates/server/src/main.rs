//! mcp-alexcache server entry point.
//!
//! Boots the MCP server on stdio transport. Logging goes to stderr to avoid
//! interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use alexcache_client::TieredCacheProvider;
use alexcache_core::AppConfig;
use anyhow::Result;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        profile = %config.profile,
        remote = config.remote_base_url.as_deref().unwrap_or("<unset>"),
        "starting mcp-alexcache server on stdio transport"
    );

    let provider = Arc::new(TieredCacheProvider::new(&config).await?);
    let handler = handler::AlexCacheServer::new(provider);
    let server = serve_server(handler, stdio()).await?;

    server.waiting().await?;

    Ok(())
}
