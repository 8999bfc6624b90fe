//! Embedding capability boundary.
//!
//! The pipeline only depends on `embed(texts) -> vectors`; the concrete
//! backend (local model, hosted API) is selected once at startup and injected
//! behind [`EmbeddingProvider`].

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::types::DocsmithError;

/// Maps text to fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a batch of texts, returning one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DocsmithError>;

    /// Vector width produced by this provider.
    fn dimensions(&self) -> usize;

    /// Short backend label for logs and telemetry.
    fn name(&self) -> &str;
}

/// Deterministic hash-derived embeddings for tests and offline runs.
///
/// Identical text always produces identical vectors, so indexing idempotence
/// and ranking determinism can be asserted without a real model.
pub struct MockEmbeddingProvider {
    dims: usize,
    calls: AtomicUsize,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self::with_dimensions(8)
    }

    pub fn with_dimensions(dims: usize) -> Self {
        Self {
            dims,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `embed_batch` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hash_to_vec(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();
        (0..self.dims)
            .map(|i| {
                let bits = seed.rotate_left((i as u32 % 64) * 8) ^ ((i as u64) << 24);
                (bits as f32) / u32::MAX as f32
            })
            .collect()
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DocsmithError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| self.hash_to_vec(text)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Hosted embedding API speaking the common `/embeddings` request shape
/// (`{"model": ..., "input": [...]}` returning `data[].embedding`).
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dims: usize,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            dims,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DocsmithError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "model": self.model, "input": texts }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| DocsmithError::Embedding(err.to_string()))?
            .error_for_status()
            .map_err(|err| DocsmithError::Embedding(err.to_string()))?;

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| DocsmithError::Embedding(err.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(DocsmithError::Embedding(format!(
                "backend returned {} vectors for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }

        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        &self.model
    }
}
