//! Documentation discovery, ingestion, and semantic search.
//!
//! ```text
//! Library name ──► discovery::DiscoveryResolver ──► documentation root
//!                                                        │
//!                          ingestion::Crawler ◄──────────┘
//!                                    │
//!       ingestion::Normalizer ──► ingestion::Chunker ──► Chunk stream
//!                                    │
//!          embeddings::EmbeddingProvider ──► stores::SqliteVectorIndex
//!                                    │
//!        query::QueryEngine ◄── stored vectors ──► ranked SearchResults
//! ```
//!
//! [`service::DocsmithService`] assembles the whole pipeline; the individual
//! stages stay usable on their own.

pub mod config;
pub mod discovery;
pub mod embeddings;
pub mod indexer;
pub mod ingestion;
pub mod query;
pub mod registry;
pub mod service;
pub mod stores;
pub mod types;

pub use config::DocsmithConfig;
pub use embeddings::{EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
pub use indexer::IndexRequest;
pub use query::{CodeSearchOptions, SearchOptions};
pub use service::DocsmithService;
pub use types::{
    Chunk, CodeBlock, DocType, DocsmithError, IndexSummary, Library, LibraryStatus, SearchResult,
};
