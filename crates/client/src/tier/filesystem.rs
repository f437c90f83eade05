//! Local directory tree mirroring cache paths.
//!
//! Payloads live at `{root}/{relative_path}` as pretty JSON. Writes made
//! through [`FilesystemTier::store_response`] also maintain an `index.json`
//! in every directory on the way up to the root, merging collisions into the
//! existing record and rolling collision counters into parent indexes.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use alexcache_core::cache::index::{DirectoryIndex, INDEX_FILE_NAME, IndexDocument, read_directory};
use alexcache_core::cache::{CacheRecord, CachedMetadata, content_hash, should_update_cache};
use alexcache_core::{CacheKey, CollisionResolver, Error, UrlCanonicalizer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{CacheTier, TierKind, TierOutcome, TierStats};

/// Filesystem tier; inert when constructed without a root.
#[derive(Debug)]
pub struct FilesystemTier {
    root: Option<PathBuf>,
    canonicalizer: UrlCanonicalizer,
    resolver: CollisionResolver,
    stats: TierStats,
}

impl FilesystemTier {
    pub fn new(root: Option<PathBuf>, canonicalizer: UrlCanonicalizer) -> Self {
        let resolver = CollisionResolver::new(canonicalizer.clone());
        Self { root, canonicalizer, resolver, stats: TierStats::default() }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn is_available(&self) -> bool {
        self.root.is_some()
    }

    /// Store a fetched response under its canonical path.
    ///
    /// Returns the key written, or `None` if the URL is uncacheable or the
    /// tier has no root.
    pub async fn store_response(&self, url: &str, data: &Value) -> Result<Option<CacheKey>, Error> {
        let Some(root) = &self.root else {
            return Ok(None);
        };
        let Some(canonical) = self.canonicalizer.parse(url) else {
            tracing::debug!(url, "uncacheable URL, skipping filesystem store");
            return Ok(None);
        };

        if !is_contained(&canonical.path) {
            return Err(Error::InvalidInput(format!("cache path escapes the root: {}", canonical.path)));
        }
        let key = canonical.cache_key();
        self.write_entry(root, &canonical.path, url, data, Utc::now()).await?;
        Ok(Some(key))
    }

    /// Read the index of a directory relative to the root.
    pub async fn read_index(&self, relative_dir: &str) -> Option<DirectoryIndex> {
        let root = self.root.as_ref()?;
        if !relative_dir.is_empty() && !is_contained(relative_dir) {
            return None;
        }
        let path = root.join(relative_dir).join(INDEX_FILE_NAME);
        let json = tokio::fs::read_to_string(&path).await.ok()?;
        read_directory(&json, Utc::now())
    }

    async fn write_entry(
        &self, root: &Path, relative_path: &str, url: &str, data: &Value, now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let (dir, file_name) = relative_path.rsplit_once('/').unwrap_or(("", relative_path));
        let file_key = file_name.strip_suffix(".json").unwrap_or(file_name);
        let reference = format!("./{file_name}");
        let hash = content_hash(data);

        let mut index = load_index(root, dir, now).await;

        let file_path = root.join(relative_path);
        let existing = index.files.get(file_key).map(|record| CachedMetadata {
            content_hash: record.base().content_hash.clone(),
            retrieved_at: record.base().last_retrieved,
        });
        if should_update_cache(existing.as_ref(), &hash, None, now) || !tokio::fs::try_exists(&file_path).await? {
            write_json(&file_path, data).await?;
        } else {
            tracing::debug!(path = relative_path, hash = %hash, "content unchanged, keeping cached file");
        }

        let mut record = match index.files.remove(file_key) {
            Some(existing) if existing.urls().contains(&url) => existing,
            Some(existing) if self.resolver.has_collision(&existing, url) => {
                self.resolver.merge_collision(existing, url, now)
            }
            Some(existing) => {
                tracing::debug!(
                    previous = existing.primary_url(),
                    url,
                    "replacing index record for non-equivalent URL"
                );
                CacheRecord::new(url, reference.clone(), hash.clone(), now)
            }
            None => CacheRecord::new(url, reference.clone(), hash.clone(), now),
        };
        {
            let base = record.base_mut();
            base.reference = reference;
            base.content_hash = hash;
            base.last_retrieved = now;
        }
        if !self.resolver.validate_file_entry(&record) {
            tracing::warn!(path = relative_path, "stored record failed validation");
        }
        index.upsert_file(file_key, record, now);

        self.roll_up(root, dir, index, now).await
    }

    /// Write `index` for `dir`, then refresh every ancestor's directory
    /// entries and aggregated collision counters.
    async fn roll_up(
        &self, root: &Path, dir: &str, mut index: DirectoryIndex, now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut current = dir.to_string();
        loop {
            let children = load_children(root, &current, &index).await;
            let child_refs: Vec<&DirectoryIndex> = children.iter().collect();
            index.aggregate_collisions(&child_refs);
            index.last_updated = now;
            write_json(&index_path(root, &current), &IndexDocument::Directory(index.clone())).await?;

            if current.is_empty() {
                return Ok(());
            }

            let (parent, name) = current.rsplit_once('/').unwrap_or(("", current.as_str()));
            let (parent, name) = (parent.to_string(), name.to_string());
            let mut parent_index = load_index(root, &parent, now).await;
            parent_index.upsert_directory(name, now);
            index = parent_index;
            current = parent;
        }
    }

    /// Payload path for `key`, or `None` without a root or when the key
    /// would resolve outside it.
    fn entry_path(&self, key: &CacheKey) -> Option<PathBuf> {
        let root = self.root.as_ref()?;
        let relative = key.relative_path();
        if !is_contained(&relative) {
            tracing::debug!(key = %key, "key resolves outside the cache root");
            return None;
        }
        Some(root.join(relative))
    }
}

/// True when every component of `relative` is a plain name, so joining it
/// onto the root cannot leave the root.
fn is_contained(relative: &str) -> bool {
    let path = Path::new(relative);
    path.components().next().is_some() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// A resource type must be exactly one plain path component.
fn is_type_component(resource_type: &str) -> bool {
    is_contained(resource_type) && Path::new(resource_type).components().count() == 1
}

fn index_path(root: &Path, dir: &str) -> PathBuf {
    if dir.is_empty() { root.join(INDEX_FILE_NAME) } else { root.join(dir).join(INDEX_FILE_NAME) }
}

async fn load_index(root: &Path, dir: &str, now: DateTime<Utc>) -> DirectoryIndex {
    let path = index_path(root, dir);
    match tokio::fs::read_to_string(&path).await {
        Ok(json) => read_directory(&json, now).unwrap_or_else(|| {
            tracing::warn!(path = %path.display(), "unreadable index, starting fresh");
            DirectoryIndex::new(dir_label(dir), now)
        }),
        Err(_) => DirectoryIndex::new(dir_label(dir), now),
    }
}

async fn load_children(root: &Path, dir: &str, index: &DirectoryIndex) -> Vec<DirectoryIndex> {
    let mut children = Vec::with_capacity(index.directories.len());
    for name in index.directories.keys() {
        let child_dir = if dir.is_empty() { name.clone() } else { format!("{dir}/{name}") };
        let Ok(json) = tokio::fs::read_to_string(index_path(root, &child_dir)).await else {
            continue;
        };
        if let Some(child) = read_directory(&json, index.last_updated) {
            children.push(child);
        }
    }
    children
}

fn dir_label(dir: &str) -> Option<String> {
    if dir.is_empty() { None } else { Some(dir.to_string()) }
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

/// Collect payload keys under `{root}/{resource_type}`, indexes excluded.
async fn walk_keys(root: &Path, resource_type: &str) -> Result<Vec<CacheKey>, Error> {
    let mut keys = Vec::new();

    let collection = root.join(format!("{resource_type}.json"));
    if tokio::fs::try_exists(&collection).await? {
        keys.push(CacheKey::collection(resource_type));
    }

    let mut pending = vec![root.join(resource_type)];
    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
                continue;
            }
            if path.file_name().is_some_and(|n| n == INDEX_FILE_NAME) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if let Some(key) = CacheKey::from_relative_path(&relative) {
                keys.push(key);
            }
        }
    }

    keys.sort();
    Ok(keys)
}

#[async_trait]
impl CacheTier for FilesystemTier {
    fn kind(&self) -> TierKind {
        TierKind::Filesystem
    }

    async fn get(&self, key: &CacheKey) -> TierOutcome {
        let Some(path) = self.entry_path(key) else {
            self.stats.record_miss();
            return TierOutcome::Miss;
        };

        let start = Instant::now();
        let outcome = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(data) => TierOutcome::Hit { data, load_time: start.elapsed() },
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "malformed cache file");
                    TierOutcome::Error(e.to_string())
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => TierOutcome::Miss,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "filesystem tier read failed");
                TierOutcome::Error(e.to_string())
            }
        };
        self.stats.record(&outcome);
        outcome
    }

    async fn has(&self, key: &CacheKey) -> bool {
        match self.entry_path(key) {
            Some(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            None => false,
        }
    }

    /// Writes go through the same path as [`FilesystemTier::store_response`],
    /// with the request URL rebuilt from the key.
    async fn set(&self, key: &CacheKey, data: &Value) -> Result<(), Error> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let relative = key.relative_path();
        if !is_contained(&relative) {
            return Err(Error::InvalidInput(format!("cache key resolves outside the root: {key}")));
        }
        let url = self.canonicalizer.request_url(key);
        self.write_entry(root, &relative, &url, data, Utc::now()).await
    }

    async fn clear(&self) -> Result<(), Error> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        match tokio::fs::remove_dir_all(root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(root = %root.display(), "cleared filesystem tier");
        Ok(())
    }

    /// Removes `{type}.json` and the `{type}/` tree, indexes included.
    async fn clear_type(&self, resource_type: &str) -> Result<u64, Error> {
        let Some(root) = &self.root else {
            return Ok(0);
        };
        if !is_type_component(resource_type) {
            return Err(Error::InvalidInput(format!("invalid resource type: {resource_type}")));
        }
        let removed = walk_keys(root, resource_type).await?.len() as u64;

        match tokio::fs::remove_file(root.join(format!("{resource_type}.json"))).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match tokio::fs::remove_dir_all(root.join(resource_type)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let now = Utc::now();
        let mut index = load_index(root, "", now).await;
        index.files.remove(resource_type);
        index.directories.remove(resource_type);
        self.roll_up(root, "", index, now).await?;

        tracing::info!(resource_type, removed, "cleared filesystem entries by type");
        Ok(removed)
    }

    fn supports_write(&self) -> bool {
        self.root.is_some()
    }

    async fn list(&self, resource_type: &str) -> Vec<CacheKey> {
        let Some(root) = &self.root else {
            return Vec::new();
        };
        if !is_type_component(resource_type) {
            return Vec::new();
        }
        walk_keys(root, resource_type).await.unwrap_or_else(|e| {
            tracing::debug!(resource_type, error = %e, "filesystem tier enumeration failed");
            Vec::new()
        })
    }

    fn stats(&self) -> &TierStats {
        &self.stats
    }
}
