//! Directory and unified index manifests.
//!
//! Every cache directory carries an `index.json` describing its files and
//! subdirectories (the hierarchical form). Sync and browsing tools prefer one
//! flat map from URL to file (the unified form). Both are stored as tagged
//! documents so readers never have to guess which one they hold.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::CacheRecord;

/// File name of the per-directory manifest.
pub const INDEX_FILE_NAME: &str = "index.json";

/// A subdirectory entry in a directory index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryRef {
    #[serde(rename = "$ref")]
    pub reference: String,
    pub last_modified: DateTime<Utc>,
}

/// Collision counters rolled up from a directory and its descendants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedCollisions {
    /// Sum of `mergedCount` over extended records.
    pub total_merged: u64,
    /// Number of extended records.
    pub extended_entries: usize,
    /// Sum of `totalUrls` over extended records.
    pub total_urls: usize,
}

impl AggregatedCollisions {
    pub fn add(&mut self, other: &AggregatedCollisions) {
        self.total_merged += other.total_merged;
        self.extended_entries += other.extended_entries;
        self.total_urls += other.total_urls;
    }

    pub fn is_empty(&self) -> bool {
        self.extended_entries == 0
    }
}

/// Hierarchical manifest of one cache directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryIndex {
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub files: BTreeMap<String, CacheRecord>,
    #[serde(default)]
    pub directories: BTreeMap<String, DirectoryRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregated_collisions: Option<AggregatedCollisions>,
}

impl DirectoryIndex {
    pub fn new(path: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            last_updated: now,
            path,
            files: BTreeMap::new(),
            directories: BTreeMap::new(),
            aggregated_collisions: None,
        }
    }

    pub fn upsert_file(&mut self, name: impl Into<String>, record: CacheRecord, now: DateTime<Utc>) {
        self.files.insert(name.into(), record);
        self.last_updated = now;
    }

    pub fn upsert_directory(&mut self, name: impl Into<String>, now: DateTime<Utc>) {
        let name = name.into();
        let reference = format!("./{name}/{INDEX_FILE_NAME}");
        self.directories.insert(name, DirectoryRef { reference, last_modified: now });
        self.last_updated = now;
    }

    /// Collision counters of this directory's own files.
    pub fn own_collisions(&self) -> AggregatedCollisions {
        let mut totals = AggregatedCollisions::default();
        for ext in self.files.values().filter_map(CacheRecord::as_extended) {
            totals.total_merged += ext.collision_info.merged_count;
            totals.extended_entries += 1;
            totals.total_urls += ext.collision_info.total_urls;
        }
        totals
    }

    /// Recompute `aggregatedCollisions` from own files plus child indexes.
    ///
    /// A child without aggregated counters contributes its own files.
    pub fn aggregate_collisions(&mut self, children: &[&DirectoryIndex]) {
        let mut totals = self.own_collisions();
        for child in children {
            let child_totals = child.aggregated_collisions.unwrap_or_else(|| child.own_collisions());
            totals.add(&child_totals);
        }
        self.aggregated_collisions = if totals.is_empty() { None } else { Some(totals) };
    }
}

/// One entry of a unified index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedEntry {
    #[serde(rename = "$ref")]
    pub reference: String,
    pub last_modified: DateTime<Utc>,
    pub content_hash: String,
}

/// Flat map from request URL to stored file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedIndex {
    pub entries: BTreeMap<String, UnifiedEntry>,
}

impl UnifiedIndex {
    /// Fold another index in; later entries win.
    pub fn extend(&mut self, other: UnifiedIndex) {
        self.entries.extend(other.entries);
    }
}

/// An index document as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IndexDocument {
    Directory(DirectoryIndex),
    Unified(UnifiedIndex),
}

impl IndexDocument {
    /// Parse a stored document; unknown or malformed documents yield `None`.
    pub fn from_json(json: &str) -> Option<Self> {
        match serde_json::from_str(json) {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::debug!(error = %e, "unrecognized index document");
                None
            }
        }
    }

    pub fn into_unified(self) -> UnifiedIndex {
        match self {
            IndexDocument::Directory(dir) => to_unified(&dir),
            IndexDocument::Unified(unified) => unified,
        }
    }

    pub fn into_directory(self, now: DateTime<Utc>) -> DirectoryIndex {
        match self {
            IndexDocument::Directory(dir) => dir,
            IndexDocument::Unified(unified) => to_directory(&unified, now),
        }
    }
}

/// Flatten a directory index into URL → file entries, keyed by primary URL.
pub fn to_unified(dir: &DirectoryIndex) -> UnifiedIndex {
    let entries = dir
        .files
        .values()
        .map(|record| {
            let base = record.base();
            (
                base.url.clone(),
                UnifiedEntry {
                    reference: base.reference.clone(),
                    last_modified: base.last_retrieved,
                    content_hash: base.content_hash.clone(),
                },
            )
        })
        .collect();
    UnifiedIndex { entries }
}

/// Rebuild a single-level directory index from a unified index.
///
/// File keys come from each entry's reference with any leading `./` and the
/// `.json` extension removed. Records come back in the legacy format.
pub fn to_directory(unified: &UnifiedIndex, now: DateTime<Utc>) -> DirectoryIndex {
    let mut dir = DirectoryIndex::new(None, now);
    for (url, entry) in &unified.entries {
        let record =
            CacheRecord::new(url.clone(), entry.reference.clone(), entry.content_hash.clone(), entry.last_modified);
        dir.files.insert(file_key(&entry.reference), record);
    }
    dir
}

/// File key derived from a payload reference.
pub fn file_key(reference: &str) -> String {
    let trimmed = reference.strip_prefix("./").unwrap_or(reference);
    trimmed.strip_suffix(".json").unwrap_or(trimmed).to_string()
}

/// Read any index document as a unified index.
pub fn read_unified(json: &str) -> Option<UnifiedIndex> {
    IndexDocument::from_json(json).map(IndexDocument::into_unified)
}

/// Read any index document as a directory index.
pub fn read_directory(json: &str, now: DateTime<Utc>) -> Option<DirectoryIndex> {
    IndexDocument::from_json(json).map(|doc| doc.into_directory(now))
}
