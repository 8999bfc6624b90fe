//! Vector storage for documentation chunks.
//!
//! A single [`VectorIndex`] trait abstracts over storage implementations so
//! the indexer and query engine never touch a concrete database.
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │   VectorIndex    │
//!                  │  (async CRUD +   │
//!                  │ similarity search)│
//!                  └────────┬─────────┘
//!                           │
//!                           ▼
//!                  ┌──────────────────┐
//!                  │      SQLite      │
//!                  │    sqlite-vec    │
//!                  └──────────────────┘
//! ```

pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Chunk, CodeBlock, DocType, DocsmithError};

pub use sqlite::SqliteVectorIndex;

/// Backend-agnostic chunk row, ready for storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub library: String,
    pub document_url: String,
    pub heading: String,
    pub doc_type: DocType,
    pub ordinal: usize,
    pub text: String,
    pub code_blocks: Vec<CodeBlock>,
    /// Languages of the attached code blocks, denormalized for filtering.
    pub languages: Vec<String>,
    pub embedding: Option<Vec<f32>>,
}

impl ChunkRecord {
    pub fn from_chunk(chunk: Chunk, embedding: Vec<f32>) -> Self {
        let languages = chunk
            .code_blocks
            .iter()
            .filter_map(|block| block.language.clone())
            .collect();
        Self {
            chunk_id: chunk.chunk_id,
            library: chunk.library,
            document_url: chunk.document_url,
            heading: chunk.heading,
            doc_type: chunk.doc_type,
            ordinal: chunk.ordinal,
            text: chunk.text,
            code_blocks: chunk.code_blocks,
            languages,
            embedding: Some(embedding),
        }
    }

    pub fn has_code(&self) -> bool {
        !self.code_blocks.is_empty()
    }
}

/// Metadata constraints applied inside a similarity search.
#[derive(Clone, Debug, Default)]
pub struct SearchFilter {
    pub library: Option<String>,
    pub doc_type: Option<DocType>,
    /// Restrict to chunks with a code block in this language.
    pub language: Option<String>,
    /// Restrict to chunks carrying at least one code block.
    pub require_code: bool,
}

/// Unified interface over chunk vector stores.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts or replaces chunk records together with their embeddings.
    /// Records without an embedding are rejected.
    async fn insert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<(), DocsmithError>;

    /// Removes everything stored for `library`, returning the row count.
    async fn delete_library(&self, library: &str) -> Result<usize, DocsmithError>;

    /// Similarity search returning up to `top_k` chunks with cosine
    /// similarity scores, most similar first, after applying `filter`.
    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(ChunkRecord, f32)>, DocsmithError>;

    /// Number of chunks stored for `library`.
    async fn count_library(&self, library: &str) -> Result<usize, DocsmithError>;
}
