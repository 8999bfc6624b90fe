//! Ingestion pipeline stages: crawl, normalize, chunk, dedup.
//!
//! Each stage is independently testable; the indexer wires them together.

pub mod chunker;
pub mod crawler;
pub mod dedup;
pub mod normalizer;

pub use chunker::Chunker;
pub use crawler::{CrawlOutcome, Crawler};
pub use dedup::DedupCache;
pub use normalizer::{NormalizedDoc, Normalizer, Segment};
