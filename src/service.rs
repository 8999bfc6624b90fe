//! Top-level service facade wiring configuration, storage, discovery,
//! indexing, and querying together.

use std::sync::Arc;

use tracing::info;

use crate::config::DocsmithConfig;
use crate::discovery::{DiscoveryResolver, PatternSource};
use crate::embeddings::EmbeddingProvider;
use crate::indexer::{IndexRequest, Indexer};
use crate::ingestion::{Crawler, DedupCache};
use crate::query::{CodeSearchOptions, QueryEngine, SearchOptions};
use crate::registry::LibraryRegistry;
use crate::stores::{SqliteVectorIndex, VectorIndex};
use crate::types::{DocsmithError, IndexSummary, Library, SearchResult};

/// One assembled documentation engine. Construct through [`DocsmithService::builder`].
pub struct DocsmithService {
    registry: Arc<LibraryRegistry>,
    indexer: Indexer,
    query: QueryEngine,
}

pub struct DocsmithServiceBuilder {
    config: DocsmithConfig,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    index: Option<Arc<dyn VectorIndex>>,
}

impl DocsmithService {
    pub fn builder(config: DocsmithConfig) -> DocsmithServiceBuilder {
        DocsmithServiceBuilder {
            config,
            provider: None,
            index: None,
        }
    }

    /// Discovers, crawls, and indexes a library's documentation.
    pub async fn discover_library(
        &self,
        request: IndexRequest,
    ) -> Result<IndexSummary, DocsmithError> {
        self.indexer.discover_library(request).await
    }

    /// Ranked semantic search over indexed documentation.
    pub async fn search_documentation(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, DocsmithError> {
        self.query.search_documentation(query, options).await
    }

    /// Semantic search restricted to chunks carrying code blocks.
    pub async fn search_code_examples(
        &self,
        query: &str,
        options: &CodeSearchOptions,
    ) -> Result<Vec<SearchResult>, DocsmithError> {
        self.query.search_code_examples(query, options).await
    }

    /// Registry entry for one library, if known.
    pub fn library_info(&self, name: &str) -> Option<Library> {
        self.registry.get(&name.to_lowercase())
    }

    /// All known libraries, sorted by name.
    pub fn list_libraries(&self) -> Vec<Library> {
        self.registry.list()
    }
}

impl DocsmithServiceBuilder {
    /// Embedding backend used for both indexing and querying. Required.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Overrides the default SQLite vector store.
    pub fn vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub async fn build(self) -> Result<DocsmithService, DocsmithError> {
        let provider = self.provider.ok_or_else(|| {
            DocsmithError::Embedding("no embedding provider configured".to_string())
        })?;

        let client = reqwest::Client::builder()
            .user_agent(self.config.user_agent.clone())
            .build()?;

        let index: Arc<dyn VectorIndex> = match self.index {
            Some(index) => index,
            None => Arc::new(
                SqliteVectorIndex::open(&self.config.db_path, provider.dimensions()).await?,
            ),
        };

        let registry = Arc::new(LibraryRegistry::load(self.config.registry_path()).await?);
        let dedup = DedupCache::load(self.config.dedup_cache_path()).await?;

        let resolver = DiscoveryResolver::new(
            client.clone(),
            Box::new(PatternSource::from_config(&self.config)),
            &self.config,
        );
        let crawler = Crawler::new(client, &self.config);

        let query = QueryEngine::new(
            &self.config,
            Arc::clone(&provider),
            Arc::clone(&index),
            Arc::clone(&registry),
        );
        let indexer = Indexer::new(
            self.config,
            resolver,
            crawler,
            Arc::clone(&provider),
            index,
            Arc::clone(&registry),
            dedup,
        );

        info!(provider = provider.name(), "documentation service ready");
        Ok(DocsmithService {
            registry,
            indexer,
            query,
        })
    }
}
