//! Per-resource cache records.
//!
//! A record is either `legacy` (one URL) or `extended` (the URL plus every
//! equivalent URL seen so far and collision statistics). The `format` tag is
//! stored with the record; [`CacheRecord::upgrade`] is the only way from one
//! to the other.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fields shared by both record formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordBase {
    /// Primary request URL.
    pub url: String,
    /// Relative path of the stored payload.
    #[serde(rename = "$ref")]
    pub reference: String,
    pub last_retrieved: DateTime<Utc>,
    pub content_hash: String,
}

/// Counters describing merges into an extended record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollisionStats {
    pub merged_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_collision: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_merge: Option<DateTime<Utc>>,
    pub total_urls: usize,
}

/// A record tracking every URL that resolved to the same cache path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedRecord {
    #[serde(flatten)]
    pub base: RecordBase,
    /// Primary URL first, then the others most recently seen first.
    pub equivalent_urls: Vec<String>,
    /// When each equivalent URL was first observed.
    pub url_timestamps: BTreeMap<String, DateTime<Utc>>,
    pub collision_info: CollisionStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum CacheRecord {
    Legacy(RecordBase),
    Extended(ExtendedRecord),
}

impl CacheRecord {
    /// A fresh single-URL record.
    pub fn new(
        url: impl Into<String>, reference: impl Into<String>, content_hash: impl Into<String>, now: DateTime<Utc>,
    ) -> Self {
        CacheRecord::Legacy(RecordBase {
            url: url.into(),
            reference: reference.into(),
            last_retrieved: now,
            content_hash: content_hash.into(),
        })
    }

    pub fn base(&self) -> &RecordBase {
        match self {
            CacheRecord::Legacy(base) => base,
            CacheRecord::Extended(ext) => &ext.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut RecordBase {
        match self {
            CacheRecord::Legacy(base) => base,
            CacheRecord::Extended(ext) => &mut ext.base,
        }
    }

    pub fn primary_url(&self) -> &str {
        &self.base().url
    }

    pub fn is_extended(&self) -> bool {
        matches!(self, CacheRecord::Extended(_))
    }

    pub fn as_extended(&self) -> Option<&ExtendedRecord> {
        match self {
            CacheRecord::Extended(ext) => Some(ext),
            CacheRecord::Legacy(_) => None,
        }
    }

    /// Every URL served by this record, primary first.
    pub fn urls(&self) -> Vec<&str> {
        match self {
            CacheRecord::Legacy(base) => vec![base.url.as_str()],
            CacheRecord::Extended(ext) => ext.equivalent_urls.iter().map(String::as_str).collect(),
        }
    }

    /// Convert to the extended format.
    ///
    /// A legacy record becomes a one-URL extended record whose primary URL
    /// was first seen at its retrieval time. Extended records pass through.
    pub fn upgrade(self) -> ExtendedRecord {
        match self {
            CacheRecord::Extended(ext) => ext,
            CacheRecord::Legacy(base) => {
                let mut url_timestamps = BTreeMap::new();
                url_timestamps.insert(base.url.clone(), base.last_retrieved);
                ExtendedRecord {
                    equivalent_urls: vec![base.url.clone()],
                    url_timestamps,
                    collision_info: CollisionStats { total_urls: 1, ..Default::default() },
                    base,
                }
            }
        }
    }
}
