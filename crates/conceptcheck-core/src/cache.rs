//! Reference content caches.
//!
//! The cache is an owned component handed to the resolver. Three flavours:
//! in-process (optionally expiring), on-disk JSON files, and a no-op cache
//! for tests that must observe every fetch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::model::ReferenceContent;
use crate::traits::ReferenceCache;

/// Process-local cache backed by a read-write lock.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, (Arc<ReferenceContent>, Instant)>>,
    ttl: Option<Duration>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries older than `ttl` are treated as misses.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    fn fresh(&self, inserted: Instant) -> bool {
        self.ttl.map_or(true, |ttl| inserted.elapsed() < ttl)
    }
}

#[async_trait]
impl ReferenceCache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<Arc<ReferenceContent>> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|(_, inserted)| self.fresh(*inserted))
            .map(|(content, _)| Arc::clone(content))
    }

    async fn insert(&self, key: &str, content: Arc<ReferenceContent>) {
        let mut entries = self.entries.write();
        if self.ttl.is_some() {
            entries.retain(|_, (_, inserted)| self.fresh(*inserted));
        }
        entries.insert(key.to_string(), (content, Instant::now()));
    }

    fn clear(&self) {
        self.entries.write().clear();
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|(_, inserted)| self.fresh(*inserted))
            .count()
    }
}

/// One pretty-printed JSON file per topic key.
///
/// Unreadable or corrupt files are logged and treated as misses; write
/// failures are logged and otherwise ignored so a read-only disk never fails
/// an analysis. File access runs on the blocking thread pool.
#[derive(Debug)]
pub struct DiskCache {
    dir: PathBuf,
    ttl: Option<chrono::Duration>,
    // serializes writers so a reader never sees a half-renamed file set
    write_lock: Arc<parking_lot::Mutex<()>>,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
        Ok(Self {
            dir,
            ttl: None,
            write_lock: Arc::new(parking_lot::Mutex::new(())),
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = chrono::Duration::from_std(ttl).ok();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    /// `Ok(None)` when there is no entry for the path.
    fn load(path: &Path) -> Result<Option<ReferenceContent>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read cache entry {}", path.display()))?;
        serde_json::from_str(&content)
            .map(Some)
            .with_context(|| format!("failed to parse cache entry {}", path.display()))
    }

    fn store(
        path: &Path,
        content: &ReferenceContent,
        write_lock: &parking_lot::Mutex<()>,
    ) -> Result<()> {
        let json = serde_json::to_string_pretty(content).context("failed to serialize cache entry")?;
        let tmp = path.with_extension("json.tmp");
        let _guard = write_lock.lock();
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write cache entry {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to move cache entry into place {}", path.display()))?;
        Ok(())
    }

    fn entries(&self) -> Vec<PathBuf> {
        let Ok(read_dir) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        read_dir
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect()
    }
}

#[async_trait]
impl ReferenceCache for DiskCache {
    async fn get(&self, key: &str) -> Option<Arc<ReferenceContent>> {
        let path = self.path_for(key);
        let loaded = match tokio::task::spawn_blocking(move || Self::load(&path)).await {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read task failed");
                return None;
            }
        };
        match loaded {
            Ok(None) => None,
            Ok(Some(content)) => {
                if let Some(ttl) = self.ttl {
                    if chrono::Utc::now() - content.retrieved_at > ttl {
                        tracing::debug!(key, "disk cache entry expired");
                        return None;
                    }
                }
                Some(Arc::new(content))
            }
            Err(e) => {
                tracing::warn!(key, error = %format!("{e:#}"), "ignoring unreadable cache entry");
                None
            }
        }
    }

    async fn insert(&self, key: &str, content: Arc<ReferenceContent>) {
        let path = self.path_for(key);
        let write_lock = Arc::clone(&self.write_lock);
        let stored =
            tokio::task::spawn_blocking(move || Self::store(&path, &content, &write_lock)).await;
        match stored {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(key, error = %format!("{e:#}"), "failed to persist cache entry");
            }
            Err(e) => tracing::warn!(key, error = %e, "cache write task failed"),
        }
    }

    fn clear(&self) {
        let _guard = self.write_lock.lock();
        for path in self.entries() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove cache entry");
            }
        }
    }

    fn len(&self) -> usize {
        self.entries().len()
    }
}

/// Never stores anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl ReferenceCache for NoopCache {
    async fn get(&self, _key: &str) -> Option<Arc<ReferenceContent>> {
        None
    }

    async fn insert(&self, _key: &str, _content: Arc<ReferenceContent>) {}

    fn clear(&self) {}

    fn len(&self) -> usize {
        0
    }
}
