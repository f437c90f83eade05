//! Cache-related MCP tools.
//!
//! Lookups and stores address entries either by request URL or by an
//! explicit resource type and id.

pub mod admin;
pub mod lookup;
pub mod store;

pub use admin::{
    CacheClearParams, CacheEnvironmentParams, CacheListParams, clear_impl, environment_impl, list_impl, stats_impl,
};
pub use lookup::{CacheLookupParams, lookup_impl};
pub use store::{CacheStoreParams, store_impl};

use alexcache_client::TieredCacheProvider;
use alexcache_core::{CacheKey, Error};

/// Resolve a tool's addressing parameters to a cache key.
///
/// A URL wins over `resource_type`/`id` when both are given.
pub(crate) fn resolve_key(
    provider: &TieredCacheProvider, url: Option<&str>, resource_type: Option<&str>, id: Option<&str>,
) -> Result<CacheKey, Error> {
    if let Some(url) = url {
        return provider
            .canonicalizer()
            .cache_key(url)
            .ok_or_else(|| Error::Uncacheable(url.to_string()));
    }

    let resource_type = resource_type
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::InvalidInput("either url or resource_type must be provided".into()))?;

    let key = match id.map(str::trim).filter(|i| !i.is_empty()) {
        Some(id) => CacheKey::entity(resource_type, id),
        None => CacheKey::collection(resource_type),
    };
    key.validate()?;
    Ok(key)
}

/// Trim and check a bare resource type argument.
pub(crate) fn resolve_resource_type(resource_type: &str) -> Result<String, Error> {
    let resource_type = resource_type.trim();
    if resource_type.is_empty() {
        return Err(Error::InvalidInput("resource_type cannot be empty".into()));
    }
    CacheKey::collection(resource_type).validate()?;
    Ok(resource_type.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_provider;

    #[test]
    fn test_resolve_key_from_url() {
        let provider = test_provider();
        let key =
            resolve_key(&provider, Some("https://api.openalex.org/works/w123?mailto=a@b.c"), None, None).unwrap();
        assert_eq!(key, CacheKey::entity("works", "W123"));
    }

    #[test]
    fn test_resolve_key_from_parts() {
        let provider = test_provider();
        assert_eq!(
            resolve_key(&provider, None, Some("authors"), Some("A1")).unwrap(),
            CacheKey::entity("authors", "A1")
        );
        assert_eq!(resolve_key(&provider, None, Some("topics"), None).unwrap(), CacheKey::collection("topics"));
    }

    #[test]
    fn test_resolve_key_errors() {
        let provider = test_provider();
        assert!(matches!(resolve_key(&provider, None, None, Some("W1")), Err(Error::InvalidInput(_))));
        assert!(matches!(
            resolve_key(&provider, Some("https://example.com/works/W1"), None, None),
            Err(Error::Uncacheable(_))
        ));
    }

    #[test]
    fn test_resolve_key_rejects_paths_outside_root() {
        let provider = test_provider();
        let cases = [
            ("..", Some("x")),
            ("..", None),
            ("widgets", Some("W1")),
            ("works", Some("..")),
            ("works", Some("a/../../b")),
        ];
        for (resource_type, id) in cases {
            assert!(
                matches!(resolve_key(&provider, None, Some(resource_type), id), Err(Error::InvalidInput(_))),
                "accepted {resource_type}/{id:?}"
            );
        }
        assert!(matches!(resolve_key(&provider, None, Some("works"), Some("x\\y")), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_resolve_resource_type() {
        assert_eq!(resolve_resource_type(" works ").unwrap(), "works");
        assert!(matches!(resolve_resource_type(""), Err(Error::InvalidInput(_))));
        assert!(matches!(resolve_resource_type(".."), Err(Error::InvalidInput(_))));
        assert!(matches!(resolve_resource_type("works/queries"), Err(Error::InvalidInput(_))));
    }
}
