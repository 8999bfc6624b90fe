//! Library registry: status, canonical doc root, and indexing timestamps.
//!
//! State lives in memory behind a `parking_lot::RwLock` and is mirrored to a
//! JSON file after every transition. Locks are never held across await
//! points; persistence snapshots under the lock and writes outside it.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::info;

use crate::types::{DocsmithError, Library, LibraryStatus};

pub struct LibraryRegistry {
    path: PathBuf,
    libraries: RwLock<HashMap<String, Library>>,
}

impl LibraryRegistry {
    /// Loads the registry from disk; a missing file starts empty. Libraries
    /// stuck in `Indexing` from a previous process are reset to `Failed`.
    pub async fn load(path: PathBuf) -> Result<Self, DocsmithError> {
        let mut libraries: HashMap<String, Library> =
            match tokio::fs::read_to_string(&path).await {
                Ok(raw) => serde_json::from_str(&raw)?,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
                Err(err) => return Err(err.into()),
            };

        for library in libraries.values_mut() {
            if library.status == LibraryStatus::Indexing {
                library.status = LibraryStatus::Failed;
            }
        }

        Ok(Self {
            path,
            libraries: RwLock::new(libraries),
        })
    }

    pub fn get(&self, name: &str) -> Option<Library> {
        self.libraries.read().get(name).cloned()
    }

    /// All known libraries, sorted by name for stable output.
    pub fn list(&self) -> Vec<Library> {
        let mut all: Vec<Library> = self.libraries.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Moves `name` into `Indexing`, creating the entry when unknown.
    /// Rejects the transition when a job is already running for it.
    pub async fn begin_indexing(&self, name: &str) -> Result<(), DocsmithError> {
        {
            let mut libraries = self.libraries.write();
            let entry = libraries
                .entry(name.to_string())
                .or_insert_with(|| Library::new(name));
            if entry.status == LibraryStatus::Indexing {
                return Err(DocsmithError::LibraryNotReady {
                    library: name.to_string(),
                    status: LibraryStatus::Indexing,
                });
            }
            entry.status = LibraryStatus::Indexing;
        }
        self.persist().await
    }

    pub async fn mark_ready(
        &self,
        name: &str,
        doc_root: &str,
        page_count: usize,
        at: DateTime<Utc>,
    ) -> Result<(), DocsmithError> {
        {
            let mut libraries = self.libraries.write();
            let entry = libraries
                .entry(name.to_string())
                .or_insert_with(|| Library::new(name));
            entry.status = LibraryStatus::Ready;
            entry.canonical_doc_root = Some(doc_root.to_string());
            entry.last_indexed_at = Some(at);
            entry.page_count = page_count;
        }
        info!(library = name, page_count, "library ready");
        self.persist().await
    }

    pub async fn mark_failed(&self, name: &str) -> Result<(), DocsmithError> {
        {
            let mut libraries = self.libraries.write();
            let entry = libraries
                .entry(name.to_string())
                .or_insert_with(|| Library::new(name));
            entry.status = LibraryStatus::Failed;
        }
        self.persist().await
    }

    async fn persist(&self) -> Result<(), DocsmithError> {
        let snapshot = self.libraries.read().clone();
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}
