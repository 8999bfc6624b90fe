//! Content-hash dedup cache.
//!
//! Remembers the body hash and chunk ids of every indexed page so re-index
//! runs can skip unchanged documents without re-embedding them. Persisted as
//! JSON next to the library registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::types::DocsmithError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub library: String,
    pub content_hash: String,
    pub chunk_ids: Vec<String>,
}

/// Keyed by document URL.
#[derive(Clone)]
pub struct DedupCache {
    path: PathBuf,
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl DedupCache {
    /// Loads the cache from disk; a missing file starts an empty cache.
    pub async fn load(path: PathBuf) -> Result<Self, DocsmithError> {
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), entries = entries.len(), "dedup cache loaded");
        Ok(Self {
            path,
            entries: Arc::new(Mutex::new(entries)),
        })
    }

    /// Returns the cached entry when `url` was indexed with this exact body
    /// hash before.
    pub async fn lookup(&self, url: &str, content_hash: &str) -> Option<CacheEntry> {
        let entries = self.entries.lock().await;
        entries
            .get(url)
            .filter(|entry| entry.content_hash == content_hash)
            .cloned()
    }

    /// Records a freshly indexed document and persists the cache.
    pub async fn record(
        &self,
        url: &str,
        library: &str,
        content_hash: &str,
        chunk_ids: Vec<String>,
    ) -> Result<(), DocsmithError> {
        let snapshot = {
            let mut entries = self.entries.lock().await;
            entries.insert(
                url.to_string(),
                CacheEntry {
                    library: library.to_string(),
                    content_hash: content_hash.to_string(),
                    chunk_ids,
                },
            );
            entries.clone()
        };
        self.persist(&snapshot).await
    }

    /// Forgets everything indexed for `library`. Used by forced re-indexing.
    pub async fn purge_library(&self, library: &str) -> Result<usize, DocsmithError> {
        let (removed, snapshot) = {
            let mut entries = self.entries.lock().await;
            let before = entries.len();
            entries.retain(|_, entry| entry.library != library);
            (before - entries.len(), entries.clone())
        };
        if removed > 0 {
            self.persist(&snapshot).await?;
        }
        Ok(removed)
    }

    async fn persist(&self, snapshot: &HashMap<String, CacheEntry>) -> Result<(), DocsmithError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}
