//! Indexing orchestration: discovery, crawl, chunking, embedding, storage.
//!
//! One job runs per library at a time. Concurrent discovery requests for the
//! same library coalesce onto the running job and all observers receive its
//! outcome.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::DocsmithConfig;
use crate::discovery::DiscoveryResolver;
use crate::embeddings::EmbeddingProvider;
use crate::ingestion::{Chunker, Crawler, DedupCache, Normalizer};
use crate::registry::LibraryRegistry;
use crate::stores::{ChunkRecord, VectorIndex};
use crate::types::{Chunk, DocsmithError, IndexPhase, IndexSummary, LibraryStatus};

/// Chunks per embedding request.
const EMBED_BATCH_SIZE: usize = 16;

/// Cloneable job failure shared with every coalesced observer.
#[derive(Debug, Clone)]
struct JobError {
    phase: IndexPhase,
    reason: String,
}

type JobResult = Result<IndexSummary, JobError>;

pub struct IndexRequest {
    pub library: String,
    /// Skip heuristic discovery and probe this root directly.
    pub documentation_url: Option<String>,
    /// Drop existing chunks and the dedup state before indexing.
    pub force_reindex: bool,
}

pub struct Indexer {
    config: DocsmithConfig,
    resolver: DiscoveryResolver,
    crawler: Crawler,
    normalizer: Normalizer,
    chunker: Chunker,
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    registry: Arc<LibraryRegistry>,
    dedup: DedupCache,
    /// In-flight jobs keyed by library name.
    jobs: Mutex<HashMap<String, watch::Receiver<Option<JobResult>>>>,
}

impl Indexer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DocsmithConfig,
        resolver: DiscoveryResolver,
        crawler: Crawler,
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        registry: Arc<LibraryRegistry>,
        dedup: DedupCache,
    ) -> Self {
        Self {
            normalizer: Normalizer::new(&config),
            chunker: Chunker::new(&config),
            config,
            resolver,
            crawler,
            provider,
            index,
            registry,
            dedup,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Discovers and indexes a library, coalescing with any job already
    /// running for the same name.
    pub async fn discover_library(
        &self,
        request: IndexRequest,
    ) -> Result<IndexSummary, DocsmithError> {
        let library = request.library.to_lowercase();

        let (tx, joined) = {
            let mut jobs = self.jobs.lock().await;
            if let Some(rx) = jobs.get(&library) {
                (None, Some(rx.clone()))
            } else {
                let (tx, rx) = watch::channel(None);
                jobs.insert(library.clone(), rx);
                (Some(tx), None)
            }
        };

        if let Some(mut rx) = joined {
            info!(library, "joining in-flight indexing job");
            loop {
                if let Some(result) = rx.borrow_and_update().clone() {
                    return result.map_err(|err| job_error(&library, err));
                }
                if rx.changed().await.is_err() {
                    return Err(DocsmithError::Indexing {
                        library,
                        phase: IndexPhase::Index,
                        reason: "indexing job dropped without a result".to_string(),
                    });
                }
            }
        }

        let tx = tx.expect("caller without joined receiver owns the job");
        let result = self.run_job(&library, &request).await;
        tx.send_replace(Some(result.clone()));
        self.jobs.lock().await.remove(&library);
        result.map_err(|err| job_error(&library, err))
    }

    async fn run_job(&self, library: &str, request: &IndexRequest) -> JobResult {
        if let Err(err) = self.registry.begin_indexing(library).await {
            return Err(JobError {
                phase: IndexPhase::Discovery,
                reason: err.to_string(),
            });
        }

        let result = self.run_pipeline(library, request).await;
        if let Err(err) = &result {
            warn!(library, phase = %err.phase, reason = %err.reason, "indexing job failed");
            if let Err(persist_err) = self.registry.mark_failed(library).await {
                warn!(library, error = %persist_err, "failed to persist failure status");
            }
        }
        result
    }

    async fn run_pipeline(&self, library: &str, request: &IndexRequest) -> JobResult {
        let deadline = self
            .config
            .index_deadline()
            .map(|budget| Instant::now() + budget);

        let root = self
            .resolver
            .resolve(library, request.documentation_url.as_deref())
            .await
            .map_err(|err| JobError {
                phase: IndexPhase::Discovery,
                reason: err.to_string(),
            })?;

        let outcome = self.crawler.crawl(library, &root, deadline).await;
        if outcome.docs.is_empty() {
            return Err(JobError {
                phase: IndexPhase::Crawl,
                reason: format!("no pages fetched from {root}"),
            });
        }

        if request.force_reindex {
            self.index
                .delete_library(library)
                .await
                .map_err(|err| JobError {
                    phase: IndexPhase::Index,
                    reason: err.to_string(),
                })?;
            self.dedup
                .purge_library(library)
                .await
                .map_err(|err| JobError {
                    phase: IndexPhase::Index,
                    reason: err.to_string(),
                })?;
        }

        let mut page_count = 0usize;
        let mut chunk_count = 0usize;
        let mut skipped_documents = 0usize;
        // Pages fetched before the deadline are always processed; the
        // deadline bounds page acquisition, not the embed loop.
        let deadline_hit = outcome.deadline_hit;

        for doc in &outcome.docs {
            if let Some(cached) = self.dedup.lookup(doc.url.as_str(), &doc.content_hash).await
            {
                skipped_documents += 1;
                page_count += 1;
                chunk_count += cached.chunk_ids.len();
                continue;
            }

            let Some(normalized) = self.normalizer.normalize(&doc.url, &doc.html) else {
                continue;
            };
            let chunks =
                self.chunker
                    .chunk(&normalized, doc.url.as_str(), library, &doc.content_hash);
            if chunks.is_empty() {
                continue;
            }

            let records = self.embed_chunks(chunks).await?;
            let chunk_ids: Vec<String> =
                records.iter().map(|r| r.chunk_id.clone()).collect();
            let added = records.len();

            self.index
                .insert_chunks(records)
                .await
                .map_err(|err| JobError {
                    phase: IndexPhase::Index,
                    reason: err.to_string(),
                })?;
            if let Err(err) = self
                .dedup
                .record(doc.url.as_str(), library, &doc.content_hash, chunk_ids)
                .await
            {
                warn!(library, error = %err, "dedup cache write failed");
            }

            page_count += 1;
            chunk_count += added;
        }

        if chunk_count == 0 {
            let reason = if deadline_hit {
                "deadline elapsed before any content was indexed".to_string()
            } else {
                "crawled pages produced no indexable content".to_string()
            };
            return Err(JobError {
                phase: IndexPhase::Index,
                reason,
            });
        }

        self.registry
            .mark_ready(library, root.as_str(), page_count, Utc::now())
            .await
            .map_err(|err| JobError {
                phase: IndexPhase::Index,
                reason: err.to_string(),
            })?;

        info!(
            library,
            page_count, chunk_count, skipped_documents, deadline_hit, "indexing complete"
        );

        Ok(IndexSummary {
            library: library.to_string(),
            status: LibraryStatus::Ready,
            page_count,
            chunk_count,
            skipped_documents,
        })
    }

    /// Embeds a document's chunks in bounded-concurrency batches.
    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<ChunkRecord>, JobError> {
        let batches: Vec<Vec<Chunk>> = chunks
            .chunks(EMBED_BATCH_SIZE)
            .map(|batch| batch.to_vec())
            .collect();

        let embedded: Vec<Result<Vec<ChunkRecord>, DocsmithError>> = stream::iter(batches)
            .map(|batch| async move {
                let texts: Vec<String> = batch.iter().map(embedding_text).collect();
                let vectors = self.provider.embed_batch(&texts).await?;
                if vectors.len() != batch.len() {
                    return Err(DocsmithError::Embedding(format!(
                        "provider returned {} vectors for {} chunks",
                        vectors.len(),
                        batch.len()
                    )));
                }
                Ok(batch
                    .into_iter()
                    .zip(vectors)
                    .map(|(chunk, vector)| ChunkRecord::from_chunk(chunk, vector))
                    .collect())
            })
            .buffered(self.config.embed_concurrency.max(1))
            .collect()
            .await;

        let mut records = Vec::new();
        for result in embedded {
            records.extend(result.map_err(|err| JobError {
                phase: IndexPhase::Embed,
                reason: err.to_string(),
            })?);
        }
        records.sort_by_key(|record| record.ordinal);
        Ok(records)
    }
}

/// Text handed to the embedding backend: heading context, prose, and any
/// attached code so code-oriented queries land on the right chunks.
fn embedding_text(chunk: &Chunk) -> String {
    let mut text = String::new();
    if !chunk.heading.is_empty() && !chunk.text.starts_with(&chunk.heading) {
        text.push_str(&chunk.heading);
        text.push('\n');
    }
    text.push_str(&chunk.text);
    for block in &chunk.code_blocks {
        text.push('\n');
        text.push_str(&block.code);
    }
    text
}

fn job_error(library: &str, err: JobError) -> DocsmithError {
    DocsmithError::Indexing {
        library: library.to_string(),
        phase: err.phase,
        reason: err.reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocType;

    #[test]
    fn embedding_text_includes_heading_and_code() {
        let chunk = Chunk {
            chunk_id: "c1".to_string(),
            document_url: "https://docs.example.com/guide".to_string(),
            library: "examplelib".to_string(),
            text: "Construct the widget first.".to_string(),
            heading: "Setup".to_string(),
            doc_type: DocType::Guide,
            ordinal: 0,
            code_blocks: vec![crate::types::CodeBlock {
                language: Some("rust".to_string()),
                code: "Widget::new()".to_string(),
            }],
        };

        let text = embedding_text(&chunk);
        assert!(text.starts_with("Setup\n"));
        assert!(text.contains("Construct the widget"));
        assert!(text.ends_with("Widget::new()"));
    }
}
