//! Request URL canonicalization into cache keys and file paths.
//!
//! Many request URLs describe the same cacheable content: they differ only in
//! credentials (`api_key`), contact identifiers (`mailto`), pagination cursor
//! values or parameter order. The canonicalizer collapses them onto one
//! deterministic file path.
//!
//! ### Path layout
//! - `/works` → `works.json`
//! - `/works/W123` → `works/W123.json`
//! - `/works/W123/ngrams` → `works/W123/ngrams.json`
//! - `/works?filter=...` → `works/queries/{escaped query}.json`
//!
//! Anything that cannot be mapped (foreign host, unknown resource type,
//! oversized file name) yields `None`: the URL is uncacheable, not an error.

pub mod escape;

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::Error;
use serde::{Deserialize, Serialize};

pub use escape::{escape_file_name, query_file_name, unescape_file_name};

/// Host of the API whose URLs are cached.
pub const DEFAULT_API_HOST: &str = "api.openalex.org";

/// Longest file name (final path component) the cache will produce.
pub const MAX_FILE_NAME_LEN: usize = 240;

/// Query parameters that vary per caller without changing the content.
pub const VOLATILE_PARAMS: &[&str] = &["api_key", "mailto"];

/// Pagination cursor parameter and the placeholder replacing its value.
pub const CURSOR_PARAM: &str = "cursor";
pub const CURSOR_PLACEHOLDER: &str = "*";

/// Subdirectory holding filtered and paginated query results.
pub const QUERIES_DIR: &str = "queries";

/// First path segments that name a cacheable resource type.
pub const RESOURCE_TYPES: &[&str] = &[
    "works",
    "authors",
    "sources",
    "institutions",
    "topics",
    "publishers",
    "funders",
    "concepts",
    "keywords",
    "domains",
    "fields",
    "subfields",
    "autocomplete",
];

static TYPED_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^([a-z])(\d+)$").expect("valid regex"));

static ORCID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:orcid:|https?://orcid\.org/)?(\d{4}-\d{4}-\d{4}-\d{3}[\dx])$").expect("valid regex")
});

static NUMERIC_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").expect("valid regex"));

/// Identifier prefix letter for resource types that use typed ids.
fn id_prefix(resource_type: &str) -> Option<char> {
    match resource_type {
        "works" => Some('W'),
        "authors" => Some('A'),
        "sources" => Some('S'),
        "institutions" => Some('I'),
        "topics" => Some('T'),
        "publishers" => Some('P'),
        "funders" => Some('F'),
        "concepts" => Some('C'),
        _ => None,
    }
}

/// Detect and normalize an entity identifier in a path segment.
///
/// Returns `None` when the segment is not an identifier for this resource type.
pub fn detect_identifier(resource_type: &str, segment: &str) -> Option<String> {
    if let Some(prefix) = id_prefix(resource_type)
        && let Some(caps) = TYPED_ID.captures(segment)
    {
        let letter = caps[1].chars().next()?.to_ascii_uppercase();
        if letter == prefix {
            return Some(format!("{letter}{}", &caps[2]));
        }
    }

    if resource_type == "authors"
        && let Some(caps) = ORCID.captures(segment)
    {
        return Some(caps[1].to_ascii_uppercase());
    }

    if matches!(resource_type, "domains" | "fields" | "subfields") && NUMERIC_ID.is_match(segment) {
        return Some(segment.to_string());
    }

    None
}

fn is_volatile(key: &str) -> bool {
    VOLATILE_PARAMS.iter().any(|v| v.eq_ignore_ascii_case(key))
}

fn split_pairs(query: &str) -> impl Iterator<Item = (&str, &str)> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .filter(|(key, _)| !key.is_empty())
}

/// Normalize a raw query string into its cache-key form.
///
/// Drops volatile parameters, replaces any cursor value with
/// [`CURSOR_PLACEHOLDER`], and stable-sorts the remaining pairs by key.
/// Idempotent.
pub fn normalize_query(query: &str) -> String {
    let mut pairs: Vec<(&str, &str)> = split_pairs(query)
        .filter(|(key, _)| !is_volatile(key))
        .map(|(key, value)| if key == CURSOR_PARAM { (key, CURSOR_PLACEHOLDER) } else { (key, value) })
        .collect();

    pairs.sort_by(|a, b| a.0.cmp(b.0));

    pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Remove volatile parameters from a URL, keeping everything else as sent.
///
/// Parameter order and cursor values survive. Unparseable input is returned
/// unchanged.
pub fn strip_volatile(url: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url) else {
        return url.to_string();
    };

    let kept: Vec<String> = parsed
        .query()
        .map(|q| {
            split_pairs(q)
                .filter(|(key, _)| !is_volatile(key))
                .map(|(key, value)| format!("{key}={value}"))
                .collect()
        })
        .unwrap_or_default();

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.set_query(Some(&kept.join("&")));
    }
    parsed.set_fragment(None);
    parsed.to_string()
}

/// Whether two URLs address the same cacheable content.
///
/// True iff they share host and path and their normalized queries match.
pub fn are_equivalent(a: &str, b: &str) -> bool {
    let (Ok(a), Ok(b)) = (url::Url::parse(a), url::Url::parse(b)) else {
        return false;
    };

    a.host_str() == b.host_str()
        && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
        && normalize_query(a.query().unwrap_or("")) == normalize_query(b.query().unwrap_or(""))
}

/// The `(resource type, id-or-query)` pair tiers are addressed with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CacheKey {
    /// First path segment, e.g. `works`.
    pub resource_type: String,
    /// Entity id, nested path, or `queries/{escaped}`; `None` for a collection.
    pub id: Option<String>,
}

impl CacheKey {
    pub fn collection(resource_type: impl Into<String>) -> Self {
        Self { resource_type: resource_type.into(), id: None }
    }

    pub fn entity(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self { resource_type: resource_type.into(), id: Some(id.into()) }
    }

    /// Cache file path relative to a tier root.
    pub fn relative_path(&self) -> String {
        match &self.id {
            Some(id) => format!("{}/{id}.json", self.resource_type),
            None => format!("{}.json", self.resource_type),
        }
    }

    /// Check a key built from caller-supplied parts.
    ///
    /// The resource type must be a known one and every `/`-separated id
    /// segment a plain name: not empty, not `.` or `..`, no backslash or NUL.
    pub fn validate(&self) -> Result<(), Error> {
        if !RESOURCE_TYPES.contains(&self.resource_type.as_str()) {
            return Err(Error::InvalidInput(format!("unknown resource type: {}", self.resource_type)));
        }
        if let Some(id) = &self.id
            && !id.split('/').all(is_plain_segment)
        {
            return Err(Error::InvalidInput(format!("invalid id: {id}")));
        }
        Ok(())
    }

    /// Inverse of [`CacheKey::relative_path`].
    pub fn from_relative_path(path: &str) -> Option<Self> {
        let stem = path.trim_start_matches("./").trim_start_matches('/').strip_suffix(".json")?;
        match stem.split_once('/') {
            Some((resource_type, id)) if !resource_type.is_empty() && !id.is_empty() => {
                Some(Self::entity(resource_type, id))
            }
            Some(_) => None,
            None if !stem.is_empty() => Some(Self::collection(stem)),
            None => None,
        }
    }
}

fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains(['\\', '\0'])
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}/{id}", self.resource_type),
            None => f.write_str(&self.resource_type),
        }
    }
}

/// A request URL reduced to its cache identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalUrl {
    pub scheme: String,
    pub host: String,
    pub resource_type: String,
    /// Normalized entity identifier, when the second segment is one.
    pub entity_id: Option<String>,
    /// Decoded path segments with the identifier normalized.
    pub segments: Vec<String>,
    /// Normalized query; empty when nothing survived normalization.
    pub query: String,
    /// Cache file path relative to a tier root.
    pub path: String,
}

impl CanonicalUrl {
    pub fn cache_key(&self) -> CacheKey {
        // `path` is always built by `relative_path`-compatible rules.
        CacheKey::from_relative_path(&self.path).unwrap_or_else(|| CacheKey::collection(&self.resource_type))
    }

    /// Request URL with volatile parameters removed and the rest normalized.
    pub fn url(&self) -> String {
        let path: Vec<String> = self.segments.iter().map(|s| urlencoding::encode(s).into_owned()).collect();
        let mut out = format!("{}://{}/{}", self.scheme, self.host, path.join("/"));
        if !self.query.is_empty() {
            out.push('?');
            out.push_str(&self.query);
        }
        out
    }
}

/// Maps request URLs for one API host onto cache paths.
#[derive(Debug, Clone)]
pub struct UrlCanonicalizer {
    api_host: String,
    max_file_name_len: usize,
}

impl Default for UrlCanonicalizer {
    fn default() -> Self {
        Self::new(DEFAULT_API_HOST)
    }
}

impl UrlCanonicalizer {
    pub fn new(api_host: impl Into<String>) -> Self {
        Self { api_host: api_host.into().to_ascii_lowercase(), max_file_name_len: MAX_FILE_NAME_LEN }
    }

    pub fn with_max_file_name_len(mut self, max: usize) -> Self {
        self.max_file_name_len = max;
        self
    }

    pub fn api_host(&self) -> &str {
        &self.api_host
    }

    /// Parse a request URL into its cache identity, or `None` if uncacheable.
    pub fn parse(&self, input: &str) -> Option<CanonicalUrl> {
        let parsed = url::Url::parse(input.trim()).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }

        let host = parsed.host_str()?.to_ascii_lowercase();
        if host != self.api_host {
            return None;
        }

        let mut segments: Vec<String> = parsed
            .path_segments()?
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::decode(s).map(|d| d.into_owned()).unwrap_or_else(|_| s.to_string()))
            .collect();

        let resource_type = segments.first()?.to_ascii_lowercase();
        if !RESOURCE_TYPES.contains(&resource_type.as_str()) {
            return None;
        }
        segments[0] = resource_type.clone();

        let entity_id = segments.get(1).and_then(|s| detect_identifier(&resource_type, s));
        if let Some(id) = &entity_id {
            segments[1] = id.clone();
        }

        let query = normalize_query(parsed.query().unwrap_or(""));

        let components: Vec<String> = segments.iter().map(|s| escape_file_name(s)).collect();
        let base = components.join("/");
        let (file_name, path) = if query.is_empty() {
            let last = components.last()?;
            (format!("{last}.json"), format!("{base}.json"))
        } else {
            let name = format!("{}.json", query_file_name(&query));
            let path = format!("{base}/{QUERIES_DIR}/{name}");
            (name, path)
        };

        if file_name.len() > self.max_file_name_len {
            tracing::debug!(url = input, len = file_name.len(), "cache file name exceeds length budget");
            return None;
        }

        Some(CanonicalUrl {
            scheme: parsed.scheme().to_string(),
            host,
            resource_type,
            entity_id,
            segments,
            query,
            path,
        })
    }

    /// Deterministic cache file path for a request URL.
    pub fn canonical_path(&self, url: &str) -> Option<String> {
        self.parse(url).map(|c| c.path)
    }

    /// Normalized request URL (volatile parameters removed, query sorted).
    pub fn canonical_url(&self, url: &str) -> Option<String> {
        self.parse(url).map(|c| c.url())
    }

    pub fn cache_key(&self, url: &str) -> Option<CacheKey> {
        self.parse(url).map(|c| c.cache_key())
    }

    /// Rebuild a request URL for a cache key.
    ///
    /// Query keys (`.../queries/{escaped}`) get their query string back.
    pub fn request_url(&self, key: &CacheKey) -> String {
        let mut out = format!("https://{}/{}", self.api_host, key.resource_type);
        let Some(id) = &key.id else {
            return out;
        };

        let (entity, query) = match id.rsplit_once(&format!("{QUERIES_DIR}/")) {
            Some((entity, escaped)) => (entity.trim_end_matches('/'), Some(unescape_file_name(escaped))),
            None => (id.as_str(), None),
        };

        for part in entity.split('/').filter(|p| !p.is_empty()) {
            out.push('/');
            out.push_str(&urlencoding::encode(&unescape_file_name(part)));
        }
        if let Some(query) = query {
            out.push('?');
            out.push_str(&query);
        }
        out
    }
}

/// [`UrlCanonicalizer::canonical_path`] for the default API host.
pub fn canonical_path(url: &str) -> Option<String> {
    UrlCanonicalizer::default().canonical_path(url)
}

/// [`UrlCanonicalizer::canonical_url`] for the default API host.
pub fn canonical_url(url: &str) -> Option<String> {
    UrlCanonicalizer::default().canonical_url(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://api.openalex.org";

    #[test]
    fn test_collection_path() {
        assert_eq!(canonical_path(&format!("{BASE}/works")).as_deref(), Some("works.json"));
        assert_eq!(canonical_path(&format!("{BASE}/works/")).as_deref(), Some("works.json"));
    }

    #[test]
    fn test_entity_path() {
        assert_eq!(canonical_path(&format!("{BASE}/works/W2741809807")).as_deref(), Some("works/W2741809807.json"));
        assert_eq!(canonical_path(&format!("{BASE}/works/w2741809807")).as_deref(), Some("works/W2741809807.json"));
    }

    #[test]
    fn test_orcid_identifier() {
        let bare = canonical_path(&format!("{BASE}/authors/0000-0002-1825-009x"));
        let prefixed = canonical_path(&format!("{BASE}/authors/orcid:0000-0002-1825-009X"));
        let encoded = canonical_path(&format!("{BASE}/authors/https%3A%2F%2Forcid.org%2F0000-0002-1825-009X"));
        assert_eq!(bare.as_deref(), Some("authors/0000-0002-1825-009X.json"));
        assert_eq!(bare, prefixed);
        assert_eq!(bare, encoded);
    }

    #[test]
    fn test_nested_path() {
        assert_eq!(
            canonical_path(&format!("{BASE}/works/W1/ngrams")).as_deref(),
            Some("works/W1/ngrams.json")
        );
    }

    #[test]
    fn test_query_path() {
        let path = canonical_path(&format!("{BASE}/works?filter=type:article")).unwrap();
        assert_eq!(path, "works/queries/filter__3D__type__3A__article.json");
    }

    #[test]
    fn test_volatile_params_stripped() {
        let a = canonical_path(&format!("{BASE}/works?filter=a&api_key=K1")).unwrap();
        let b = canonical_path(&format!("{BASE}/works?api_key=K2&filter=a")).unwrap();
        let c = canonical_path(&format!("{BASE}/works?filter=a&mailto=me@example.org")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(are_equivalent(
            &format!("{BASE}/works?filter=a&api_key=K1"),
            &format!("{BASE}/works?api_key=K2&filter=a")
        ));
    }

    #[test]
    fn test_only_volatile_params_is_bare_path() {
        assert_eq!(
            canonical_path(&format!("{BASE}/works/W1?api_key=K&mailto=x@y.z")).as_deref(),
            Some("works/W1.json")
        );
    }

    #[test]
    fn test_cursor_placeholder() {
        let first = canonical_path(&format!("{BASE}/works?filter=a&cursor=*")).unwrap();
        let cursor = "IlsxNjA5MzcyODAwMDAwLCAnaHR0cHM6Ly9vcGVuYWxleC5vcmcvVzI0ODg0OTk3NjQnXSI=";
        let later = canonical_path(&format!("{BASE}/works?cursor={cursor}&filter=a")).unwrap();
        assert_eq!(first, later);
    }

    #[test]
    fn test_normalize_query_idempotent() {
        let samples = ["b=2&a=1&api_key=x", "cursor=abc&filter=x:y", "flag&z=&a=1", "", "&&a=1&"];
        for q in samples {
            let once = normalize_query(q);
            assert_eq!(normalize_query(&once), once, "not idempotent for {q:?}");
        }
        assert_eq!(normalize_query("b=2&a=1&api_key=x"), "a=1&b=2");
        assert_eq!(normalize_query("cursor=abc&filter=x:y"), "cursor=*&filter=x:y");
    }

    #[test]
    fn test_uncacheable_inputs() {
        assert!(canonical_path("not a url").is_none());
        assert!(canonical_path("https://example.com/works/W1").is_none());
        assert!(canonical_path(&format!("{BASE}/unknown/X1")).is_none());
        assert!(canonical_path(&format!("{BASE}/")).is_none());
        assert!(canonical_path("ftp://api.openalex.org/works").is_none());
    }

    #[test]
    fn test_file_name_length_budget() {
        let long = "x".repeat(300);
        assert!(canonical_path(&format!("{BASE}/works?search={long}")).is_none());

        let short = UrlCanonicalizer::default().with_max_file_name_len(20);
        assert!(short.canonical_path(&format!("{BASE}/works?filter=type:article")).is_none());
        assert!(short.canonical_path(&format!("{BASE}/works/W1")).is_some());
    }

    #[test]
    fn test_canonical_url() {
        let url = canonical_url(&format!("{BASE}/works/w1?mailto=a@b.c&select=id,title")).unwrap();
        assert_eq!(url, format!("{BASE}/works/W1?select=id,title"));
    }

    #[test]
    fn test_are_equivalent_different_content() {
        assert!(!are_equivalent(&format!("{BASE}/works?filter=a"), &format!("{BASE}/works?filter=b")));
        assert!(!are_equivalent(&format!("{BASE}/works?filter=a"), &format!("{BASE}/authors?filter=a")));
        assert!(!are_equivalent(&format!("{BASE}/works"), "https://other.org/works"));
    }

    #[test]
    fn test_strip_volatile_keeps_order() {
        let stripped = strip_volatile(&format!("{BASE}/works?b=2&api_key=K&a=1"));
        assert_eq!(stripped, format!("{BASE}/works?b=2&a=1"));
    }

    #[test]
    fn test_cache_key_validate() {
        assert!(CacheKey::entity("works", "W1").validate().is_ok());
        assert!(CacheKey::entity("works", "queries/filter__3D__a").validate().is_ok());
        assert!(CacheKey::collection("topics").validate().is_ok());

        for key in [
            CacheKey::collection(".."),
            CacheKey::entity("..", "x"),
            CacheKey::entity("widgets", "x"),
            CacheKey::entity("works", ".."),
            CacheKey::entity("works", "../../etc"),
            CacheKey::entity("works", "a//b"),
            CacheKey::entity("works", "./W1"),
            CacheKey::entity("works", "..\\x"),
            CacheKey::entity("works", ""),
        ] {
            assert!(matches!(key.validate(), Err(Error::InvalidInput(_))), "accepted {key:?}");
        }
    }

    #[test]
    fn test_cache_key_round_trip() {
        let canonical = UrlCanonicalizer::default();
        let key = canonical.cache_key(&format!("{BASE}/works/W1")).unwrap();
        assert_eq!(key, CacheKey::entity("works", "W1"));
        assert_eq!(key.relative_path(), "works/W1.json");

        let key = canonical.cache_key(&format!("{BASE}/works?filter=type:article")).unwrap();
        assert_eq!(key.id.as_deref(), Some("queries/filter__3D__type__3A__article"));
        assert_eq!(CacheKey::from_relative_path(&key.relative_path()), Some(key.clone()));

        assert_eq!(CacheKey::from_relative_path("works.json"), Some(CacheKey::collection("works")));
        assert_eq!(CacheKey::from_relative_path("works"), None);
    }

    #[test]
    fn test_request_url_from_key() {
        let canonical = UrlCanonicalizer::default();
        let url = format!("{BASE}/works?filter=type:article&sort=cited_by_count:desc");
        let key = canonical.cache_key(&url).unwrap();
        let rebuilt = canonical.request_url(&key);
        assert_eq!(canonical.canonical_path(&rebuilt), canonical.canonical_path(&url));

        assert_eq!(canonical.request_url(&CacheKey::entity("works", "W1")), format!("{BASE}/works/W1"));
        assert_eq!(canonical.request_url(&CacheKey::collection("authors")), format!("{BASE}/authors"));
    }
}
