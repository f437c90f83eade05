//! Collision detection and merging.
//!
//! A collision is two or more distinct request URLs that canonicalize to the
//! same cache path. The first URL stored stays primary; later ones are
//! recorded on the (extended) record together with when they were first seen.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::record::{CacheRecord, ExtendedRecord};
use crate::key::{UrlCanonicalizer, strip_volatile};

/// Non-primary URLs kept per volatile-stripped form.
///
/// Rotating API keys or contact addresses would otherwise grow
/// `equivalentUrls` without bound.
pub const MAX_EXAMPLES_PER_GROUP: usize = 2;

/// A broken invariant in an extended record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("equivalentUrls[0] is {found:?}, expected the primary URL")]
    PrimaryNotFirst { found: Option<String> },

    #[error("{url} canonicalizes to {found:?} but the primary URL to {expected:?}")]
    PathMismatch { url: String, expected: Option<String>, found: Option<String> },

    #[error("{0} has no timestamp entry")]
    MissingTimestamp(String),

    #[error("totalUrls is {recorded} but equivalentUrls holds {actual}")]
    CountMismatch { recorded: usize, actual: usize },
}

/// Merges equivalent URLs into cache records.
#[derive(Debug, Clone, Default)]
pub struct CollisionResolver {
    canonicalizer: UrlCanonicalizer,
}

impl CollisionResolver {
    pub fn new(canonicalizer: UrlCanonicalizer) -> Self {
        Self { canonicalizer }
    }

    /// Whether `url` is a different URL for the content `record` holds.
    pub fn has_collision(&self, record: &CacheRecord, url: &str) -> bool {
        if record.primary_url() == url {
            return false;
        }
        match (self.canonicalizer.canonical_path(record.primary_url()), self.canonicalizer.canonical_path(url)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Record `new_url` as an equivalent URL of `record`.
    ///
    /// Upgrades legacy records. Merging a URL that is already tracked changes
    /// nothing, counters included. A URL with a different cache path is
    /// refused and the record returned as given.
    pub fn merge_collision(&self, record: CacheRecord, new_url: &str, now: DateTime<Utc>) -> CacheRecord {
        let already_tracked = record.urls().contains(&new_url);
        if !already_tracked && !self.has_collision(&record, new_url) {
            tracing::warn!(primary = record.primary_url(), url = new_url, "refusing to merge non-equivalent URL");
            return record;
        }

        let mut ext = record.upgrade();
        if already_tracked {
            return CacheRecord::Extended(ext);
        }

        ext.equivalent_urls.push(new_url.to_string());
        ext.url_timestamps.entry(new_url.to_string()).or_insert(now);

        let stats = &mut ext.collision_info;
        stats.merged_count += 1;
        stats.first_collision.get_or_insert(now);
        stats.last_merge = Some(now);

        order_most_recent_first(&mut ext);
        prune_groups(&mut ext);
        ext.collision_info.total_urls = ext.equivalent_urls.len();

        tracing::debug!(
            primary = %ext.base.url,
            url = new_url,
            merged = ext.collision_info.merged_count,
            total = ext.collision_info.total_urls,
            "merged collision"
        );

        CacheRecord::Extended(ext)
    }

    /// All invariant violations of a record; empty for legacy records.
    pub fn violations(&self, record: &CacheRecord) -> Vec<Violation> {
        let CacheRecord::Extended(ext) = record else {
            return Vec::new();
        };

        let mut found = Vec::new();

        if ext.equivalent_urls.first() != Some(&ext.base.url) {
            found.push(Violation::PrimaryNotFirst { found: ext.equivalent_urls.first().cloned() });
        }

        let expected = self.canonicalizer.canonical_path(&ext.base.url);
        for url in &ext.equivalent_urls {
            if url == &ext.base.url {
                continue;
            }
            let path = self.canonicalizer.canonical_path(url);
            if path.is_none() || path != expected {
                found.push(Violation::PathMismatch { url: url.clone(), expected: expected.clone(), found: path });
            }
        }

        for url in &ext.equivalent_urls {
            if !ext.url_timestamps.contains_key(url) {
                found.push(Violation::MissingTimestamp(url.clone()));
            }
        }

        if ext.collision_info.total_urls != ext.equivalent_urls.len() {
            found.push(Violation::CountMismatch {
                recorded: ext.collision_info.total_urls,
                actual: ext.equivalent_urls.len(),
            });
        }

        found
    }

    /// Check a record's invariants, logging each violation.
    pub fn validate_file_entry(&self, record: &CacheRecord) -> bool {
        let violations = self.violations(record);
        for violation in &violations {
            tracing::warn!(primary = record.primary_url(), %violation, "invalid cache record");
        }
        violations.is_empty()
    }
}

/// Keep the primary first and order the rest newest first.
///
/// URLs without a timestamp sort as oldest.
fn order_most_recent_first(ext: &mut ExtendedRecord) {
    let primary = ext.base.url.clone();
    let timestamps = &ext.url_timestamps;
    let mut others: Vec<String> = ext.equivalent_urls.drain(..).filter(|u| u != &primary).collect();
    others.sort_by(|a, b| timestamps.get(b).cmp(&timestamps.get(a)));

    ext.equivalent_urls.push(primary);
    ext.equivalent_urls.extend(others);
}

/// Keep at most [`MAX_EXAMPLES_PER_GROUP`] non-primary URLs per
/// volatile-stripped form, preferring the newest.
fn prune_groups(ext: &mut ExtendedRecord) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut kept = Vec::with_capacity(ext.equivalent_urls.len());

    for (i, url) in ext.equivalent_urls.drain(..).enumerate() {
        if i == 0 {
            kept.push(url);
            continue;
        }
        let count = seen.entry(strip_volatile(&url)).or_default();
        if *count < MAX_EXAMPLES_PER_GROUP {
            *count += 1;
            kept.push(url);
        } else {
            ext.url_timestamps.remove(&url);
        }
    }

    ext.equivalent_urls = kept;
}
