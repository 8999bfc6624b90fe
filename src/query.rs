//! Semantic search over indexed documentation.
//!
//! Queries are embedded with the same provider used at index time, matched
//! against the vector store with an oversampled fetch, then re-ranked with a
//! deterministic tie-break and a per-document result cap.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::config::DocsmithConfig;
use crate::embeddings::EmbeddingProvider;
use crate::registry::LibraryRegistry;
use crate::stores::{ChunkRecord, SearchFilter, VectorIndex};
use crate::types::{DocType, DocsmithError, LibraryStatus, SearchResult};

/// Caller-facing constraints on a documentation search.
#[derive(Clone, Debug, Default)]
pub struct SearchOptions {
    pub library: Option<String>,
    pub doc_type: Option<DocType>,
    pub max_results: Option<usize>,
}

/// Constraints on a code-example search.
#[derive(Clone, Debug, Default)]
pub struct CodeSearchOptions {
    pub library: Option<String>,
    pub language: Option<String>,
    pub max_results: Option<usize>,
}

/// Results returned by code searches when the caller does not ask for more.
const CODE_RESULTS_DEFAULT: usize = 3;

pub struct QueryEngine {
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    registry: Arc<LibraryRegistry>,
    max_results_default: usize,
    max_results_ceiling: usize,
    per_document_cap: usize,
}

impl QueryEngine {
    pub fn new(
        config: &DocsmithConfig,
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        registry: Arc<LibraryRegistry>,
    ) -> Self {
        Self {
            provider,
            index,
            registry,
            max_results_default: config.max_results_default,
            max_results_ceiling: config.max_results_ceiling,
            per_document_cap: config.per_document_cap.max(1),
        }
    }

    /// Ranked documentation search.
    ///
    /// An unknown library filter yields an empty result set; a known library
    /// that is not `Ready` is an error so callers can distinguish "nothing
    /// matched" from "not indexed yet".
    pub async fn search_documentation(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, DocsmithError> {
        if query.trim().is_empty() {
            return Err(DocsmithError::Query("query must not be empty".to_string()));
        }
        if let Some(library) = &options.library {
            if !self.library_queryable(library)? {
                return Ok(Vec::new());
            }
        }

        let limit = self.clamp_results(options.max_results, self.max_results_default);
        let filter = SearchFilter {
            library: options.library.as_ref().map(|l| l.to_lowercase()),
            doc_type: options.doc_type,
            ..Default::default()
        };

        let hits = self.ranked_hits(query, limit, &filter).await?;
        Ok(hits.into_iter().map(into_result).collect())
    }

    /// Code-oriented search: only chunks carrying code blocks are returned,
    /// optionally narrowed to one language.
    pub async fn search_code_examples(
        &self,
        query: &str,
        options: &CodeSearchOptions,
    ) -> Result<Vec<SearchResult>, DocsmithError> {
        if query.trim().is_empty() {
            return Err(DocsmithError::Query("query must not be empty".to_string()));
        }
        if let Some(library) = &options.library {
            if !self.library_queryable(library)? {
                return Ok(Vec::new());
            }
        }

        let limit = self.clamp_results(options.max_results, CODE_RESULTS_DEFAULT);
        let filter = SearchFilter {
            library: options.library.as_ref().map(|l| l.to_lowercase()),
            language: options.language.as_ref().map(|l| l.to_lowercase()),
            require_code: true,
            ..Default::default()
        };

        let hits = self.ranked_hits(query, limit, &filter).await?;
        Ok(hits.into_iter().map(into_result).collect())
    }

    /// Library gate: `Ok(true)` when queryable, `Ok(false)` for unknown
    /// names, error for known libraries that are not ready.
    fn library_queryable(&self, library: &str) -> Result<bool, DocsmithError> {
        let name = library.to_lowercase();
        match self.registry.get(&name) {
            None => Ok(false),
            Some(entry) if entry.status == LibraryStatus::Ready => Ok(true),
            Some(entry) => Err(DocsmithError::LibraryNotReady {
                library: name,
                status: entry.status,
            }),
        }
    }

    fn clamp_results(&self, requested: Option<usize>, default: usize) -> usize {
        requested
            .unwrap_or(default)
            .clamp(1, self.max_results_ceiling)
    }

    async fn ranked_hits(
        &self,
        query: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(ChunkRecord, f32)>, DocsmithError> {
        let vectors = self.provider.embed_batch(&[query.to_string()]).await?;
        let query_vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| DocsmithError::Embedding("provider returned no vectors".to_string()))?;

        // Oversample so the per-document cap still leaves enough candidates.
        let fetch = limit * (self.per_document_cap + 1) + limit;
        let mut hits = self.index.search(&query_vector, fetch, filter).await?;
        debug!(candidates = hits.len(), limit, "ranking candidates");

        // Deterministic order: score, then fresher library, then chunk id.
        let recency: std::collections::HashMap<String, i64> = hits
            .iter()
            .map(|(record, _)| record.library.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .filter_map(|library| {
                let indexed_at = self.registry.get(&library)?.last_indexed_at?;
                Some((library, indexed_at.timestamp_millis()))
            })
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    let fresh_a = recency.get(&a.0.library).copied().unwrap_or(0);
                    let fresh_b = recency.get(&b.0.library).copied().unwrap_or(0);
                    fresh_b.cmp(&fresh_a)
                })
                .then_with(|| a.0.chunk_id.cmp(&b.0.chunk_id))
        });

        let mut per_document: std::collections::HashMap<String, usize> =
            std::collections::HashMap::new();
        let mut selected = Vec::with_capacity(limit);
        for (record, score) in hits {
            let used = per_document.entry(record.document_url.clone()).or_insert(0);
            if *used >= self.per_document_cap {
                continue;
            }
            *used += 1;
            selected.push((record, score));
            if selected.len() >= limit {
                break;
            }
        }
        Ok(selected)
    }
}

fn into_result((record, score): (ChunkRecord, f32)) -> SearchResult {
    SearchResult {
        chunk_id: record.chunk_id,
        library: record.library,
        document_url: record.document_url,
        heading: record.heading,
        doc_type: record.doc_type,
        score,
        text: record.text,
        code_blocks: record.code_blocks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::stores::SqliteVectorIndex;
    use crate::types::CodeBlock;
    use chrono::Utc;

    async fn engine_with_data() -> (tempfile::TempDir, QueryEngine) {
        let dir = tempfile::tempdir().unwrap();
        let config = DocsmithConfig::default();
        let provider = Arc::new(MockEmbeddingProvider::new());
        let index = Arc::new(
            SqliteVectorIndex::open(dir.path().join("q.sqlite"), provider.dimensions())
                .await
                .unwrap(),
        );
        let registry = Arc::new(
            LibraryRegistry::load(dir.path().join("r.json"))
                .await
                .unwrap(),
        );
        registry.begin_indexing("examplelib").await.unwrap();
        registry
            .mark_ready("examplelib", "https://docs.example.com/", 2, Utc::now())
            .await
            .unwrap();

        let mut records = Vec::new();
        for (i, (text, code)) in [
            ("Widgets are configured through the builder.", false),
            ("The crawler respects politeness delays.", false),
            ("Construct a widget in code.", true),
        ]
        .iter()
        .enumerate()
        {
            let vector = provider
                .embed_batch(&[text.to_string()])
                .await
                .unwrap()
                .remove(0);
            let mut record = ChunkRecord {
                chunk_id: format!("c{i}"),
                library: "examplelib".to_string(),
                document_url: format!("https://docs.example.com/p{i}"),
                heading: "H".to_string(),
                doc_type: crate::types::DocType::Docs,
                ordinal: 0,
                text: text.to_string(),
                code_blocks: Vec::new(),
                languages: Vec::new(),
                embedding: Some(vector),
            };
            if *code {
                record.code_blocks = vec![CodeBlock {
                    language: Some("rust".to_string()),
                    code: "Widget::new()".to_string(),
                }];
                record.languages = vec!["rust".to_string()];
            }
            records.push(record);
        }
        index.insert_chunks(records).await.unwrap();

        let engine = QueryEngine::new(&config, provider, index, registry);
        (dir, engine)
    }

    #[tokio::test]
    async fn exact_text_match_ranks_first() {
        let (_dir, engine) = engine_with_data().await;
        let results = engine
            .search_documentation(
                "Widgets are configured through the builder.",
                &SearchOptions::default(),
            )
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert_eq!(results[0].chunk_id, "c0");
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn unknown_library_returns_empty() {
        let (_dir, engine) = engine_with_data().await;
        let results = engine
            .search_documentation(
                "anything",
                &SearchOptions {
                    library: Some("neverheardofit".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn not_ready_library_is_an_error() {
        let (_dir, engine) = engine_with_data().await;
        engine.registry.begin_indexing("pending").await.unwrap();

        let err = engine
            .search_documentation(
                "anything",
                &SearchOptions {
                    library: Some("pending".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocsmithError::LibraryNotReady { .. }));
    }

    #[tokio::test]
    async fn code_search_only_returns_code_chunks() {
        let (_dir, engine) = engine_with_data().await;
        let results = engine
            .search_code_examples("construct widget", &CodeSearchOptions::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "c2");
        assert!(!results[0].code_blocks.is_empty());
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let (_dir, engine) = engine_with_data().await;
        let err = engine
            .search_documentation("   ", &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DocsmithError::Query(_)));
    }

    #[tokio::test]
    async fn per_document_cap_limits_hits_from_one_page() {
        let (_dir, engine) = engine_with_data().await;

        // Six near-identical chunks on one document.
        let mut records = Vec::new();
        for i in 0..6 {
            let text = format!("The politeness delay is explained again, take {i}.");
            let vector = engine
                .provider
                .embed_batch(&[text.clone()])
                .await
                .unwrap()
                .remove(0);
            records.push(ChunkRecord {
                chunk_id: format!("dup{i}"),
                library: "examplelib".to_string(),
                document_url: "https://docs.example.com/delay".to_string(),
                heading: "Delays".to_string(),
                doc_type: crate::types::DocType::Docs,
                ordinal: i,
                text,
                code_blocks: Vec::new(),
                languages: Vec::new(),
                embedding: Some(vector),
            });
        }
        engine.index.insert_chunks(records).await.unwrap();

        let results = engine
            .search_documentation(
                "politeness delay",
                &SearchOptions {
                    library: Some("examplelib".to_string()),
                    max_results: Some(10),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let from_delay_page = results
            .iter()
            .filter(|r| r.document_url == "https://docs.example.com/delay")
            .count();
        assert!(from_delay_page <= engine.per_document_cap);
        assert!(from_delay_page > 0);
    }

    #[tokio::test]
    async fn requested_count_is_clamped_to_ceiling() {
        let (_dir, engine) = engine_with_data().await;
        let results = engine
            .search_documentation(
                "widget",
                &SearchOptions {
                    max_results: Some(500),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(results.len() <= engine.max_results_ceiling);
    }
}
