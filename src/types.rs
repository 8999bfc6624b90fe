//! Shared data model and error taxonomy for the documentation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Lifecycle of an indexed library.
///
/// Transitions are `Unindexed -> Indexing -> {Ready, Failed}`, plus
/// `Ready -> Indexing` on re-index and `Failed -> Indexing` on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryStatus {
    Unindexed,
    Indexing,
    Ready,
    Failed,
}

impl fmt::Display for LibraryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unindexed => "unindexed",
            Self::Indexing => "indexing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Registry entry for a documentation library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    /// Root URL the crawl started from, once known.
    pub canonical_doc_root: Option<String>,
    pub status: LibraryStatus,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub page_count: usize,
}

impl Library {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            canonical_doc_root: None,
            status: LibraryStatus::Unindexed,
            last_indexed_at: None,
            page_count: 0,
        }
    }
}

/// Coarse classification of a documentation page, inferred from its URL and
/// headings. Unclassified pages fall back to [`DocType::Docs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Api,
    Tutorial,
    Guide,
    Example,
    /// Generic documentation page; the default when nothing else matches.
    Docs,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Tutorial => "tutorial",
            Self::Guide => "guide",
            Self::Example => "example",
            Self::Docs => "docs",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "api" => Some(Self::Api),
            "tutorial" => Some(Self::Tutorial),
            "guide" => Some(Self::Guide),
            "example" => Some(Self::Example),
            "docs" => Some(Self::Docs),
            _ => None,
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fenced or preformatted code region extracted from a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Best-effort language tag from `language-*`/`lang-*` classes.
    pub language: Option<String>,
    pub code: String,
}

/// One successfully fetched page, owned by the crawler until normalization.
#[derive(Debug, Clone)]
pub struct FetchedDoc {
    pub url: Url,
    pub library: String,
    pub depth: usize,
    pub fetched_at: DateTime<Utc>,
    /// SHA-256 of the raw response body, hex encoded.
    pub content_hash: String,
    pub html: String,
}

/// Immutable unit of embedding and retrieval.
///
/// `chunk_id` is derived from `(document_url, ordinal, content_hash)` so that
/// re-indexing unchanged content yields identical ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_url: String,
    pub library: String,
    pub text: String,
    pub heading: String,
    pub doc_type: DocType,
    pub ordinal: usize,
    pub code_blocks: Vec<CodeBlock>,
}

/// Ranked hit returned by the query engine. Ephemeral, produced per query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub library: String,
    pub document_url: String,
    pub heading: String,
    pub doc_type: DocType,
    /// Cosine similarity, higher is better.
    pub score: f32,
    pub text: String,
    pub code_blocks: Vec<CodeBlock>,
}

/// Outcome of a completed (or coalesced) indexing job.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub library: String,
    pub status: LibraryStatus,
    /// Documents that contributed chunks, fresh or via the dedup cache.
    pub page_count: usize,
    pub chunk_count: usize,
    /// Documents skipped because their content hash was unchanged.
    pub skipped_documents: usize,
}

/// Pipeline phase attached to job-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPhase {
    Discovery,
    Crawl,
    Embed,
    Index,
}

impl fmt::Display for IndexPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Discovery => "discovery",
            Self::Crawl => "crawl",
            Self::Embed => "embed",
            Self::Index => "index",
        };
        f.write_str(label)
    }
}

/// Error taxonomy for the documentation pipeline.
///
/// Per-page fetch failures are absorbed by the crawler (skip and continue);
/// everything else propagates to the caller with library and phase context.
#[derive(Debug, thiserror::Error)]
pub enum DocsmithError {
    /// No reachable documentation root was found for the library.
    #[error("no reachable documentation root for '{library}' ({tried} candidates probed)")]
    Discovery { library: String, tried: usize },

    /// A single page failed to fetch. Logged and skipped during crawls.
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// An indexing job failed as a whole.
    #[error("indexing '{library}' failed during {phase}: {reason}")]
    Indexing {
        library: String,
        phase: IndexPhase,
        reason: String,
    },

    /// The target library exists but is not queryable yet.
    #[error("library '{library}' is not ready for queries (status: {status})")]
    LibraryNotReady {
        library: String,
        status: LibraryStatus,
    },

    #[error("query failed: {0}")]
    Query(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("embedding backend error: {0}")]
    Embedding(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_type_round_trips_through_str() {
        for doc_type in [
            DocType::Api,
            DocType::Tutorial,
            DocType::Guide,
            DocType::Example,
            DocType::Docs,
        ] {
            assert_eq!(DocType::parse(doc_type.as_str()), Some(doc_type));
        }
        assert_eq!(DocType::parse("changelog"), None);
    }

    #[test]
    fn errors_carry_library_and_phase() {
        let err = DocsmithError::Indexing {
            library: "examplelib".into(),
            phase: IndexPhase::Embed,
            reason: "backend unreachable".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("examplelib"));
        assert!(rendered.contains("embed"));
    }
}
