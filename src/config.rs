//! Static startup configuration for the pipeline.
//!
//! Every knob the core consumes is supplied here once at startup; nothing is
//! re-derived at call sites. Values deserialize from a JSON file and fall back
//! to the defaults below.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::DocsmithError;

/// Tunable knobs for crawling, chunking, embedding, and querying.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocsmithConfig {
    /// Parallel fetch workers driving a crawl.
    pub crawl_concurrency: usize,
    /// Hard page budget per library.
    pub max_pages_per_library: usize,
    /// Maximum link depth from the documentation root.
    pub max_depth: usize,
    /// Links followed per page, after filtering.
    pub max_links_per_page: usize,
    /// Minimum gap between requests to the same host, in milliseconds.
    pub request_delay_ms: u64,
    /// Per-request timeout, in seconds.
    pub request_timeout_secs: u64,
    /// Optional wall-clock deadline for a whole indexing job, in seconds.
    pub index_deadline_secs: Option<u64>,

    /// Maximum prose characters per chunk.
    pub chunk_max_chars: usize,
    /// Characters of trailing context carried into the next chunk.
    pub chunk_overlap_chars: usize,
    /// Pages with less prose than this are skipped.
    pub min_content_chars: usize,
    /// Code regions shorter than this are ignored.
    pub min_code_block_chars: usize,

    /// Concurrent embedding batches in flight, independent of crawl workers.
    pub embed_concurrency: usize,

    /// Results returned when the caller does not ask for a count.
    pub max_results_default: usize,
    /// Server-side ceiling on any requested result count.
    pub max_results_ceiling: usize,
    /// Maximum results sourced from a single document per query.
    pub per_document_cap: usize,

    /// SQLite database holding chunks and embeddings.
    pub db_path: PathBuf,
    /// Directory for the dedup cache and library registry files.
    pub data_dir: PathBuf,

    pub user_agent: String,
    /// When non-empty, crawling and probing is restricted to these hosts.
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,

    /// Documentation roots for libraries we already know about. Checked
    /// before any pattern probing.
    pub known_docs: HashMap<String, String>,
    /// Candidate URL templates, probed in order; `{name}` is substituted.
    pub doc_url_patterns: Vec<String>,
}

impl Default for DocsmithConfig {
    fn default() -> Self {
        Self {
            crawl_concurrency: 8,
            max_pages_per_library: 50,
            max_depth: 3,
            max_links_per_page: 10,
            request_delay_ms: 1000,
            request_timeout_secs: 30,
            index_deadline_secs: None,
            chunk_max_chars: 500,
            chunk_overlap_chars: 80,
            min_content_chars: 100,
            min_code_block_chars: 10,
            embed_concurrency: 4,
            max_results_default: 5,
            max_results_ceiling: 20,
            per_document_cap: 3,
            db_path: PathBuf::from("./docsmith.sqlite"),
            data_dir: PathBuf::from("./data"),
            user_agent: format!("docsmith/{}", env!("CARGO_PKG_VERSION")),
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            known_docs: default_known_docs(),
            doc_url_patterns: default_doc_url_patterns(),
        }
    }
}

impl DocsmithConfig {
    /// Loads configuration from a JSON file, filling gaps with defaults.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, DocsmithError> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn index_deadline(&self) -> Option<Duration> {
        self.index_deadline_secs.map(Duration::from_secs)
    }

    pub fn dedup_cache_path(&self) -> PathBuf {
        self.data_dir.join("dedup_cache.json")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("libraries.json")
    }

    /// Applies the allow/block lists to a candidate host.
    pub fn host_permitted(&self, host: &str) -> bool {
        if self.blocked_domains.iter().any(|blocked| blocked == host) {
            return false;
        }
        self.allowed_domains.is_empty() || self.allowed_domains.iter().any(|allowed| allowed == host)
    }
}

fn default_known_docs() -> HashMap<String, String> {
    [
        ("react", "https://react.dev/"),
        ("vue", "https://vuejs.org/guide/"),
        ("svelte", "https://svelte.dev/docs"),
        ("nextjs", "https://nextjs.org/docs"),
        ("fastapi", "https://fastapi.tiangolo.com/"),
        ("django", "https://docs.djangoproject.com/"),
        ("flask", "https://flask.palletsprojects.com/"),
        ("express", "https://expressjs.com/"),
        ("requests", "https://requests.readthedocs.io/"),
        ("pandas", "https://pandas.pydata.org/docs/"),
        ("numpy", "https://numpy.org/doc/"),
        ("pytorch", "https://pytorch.org/docs/"),
        ("kubernetes", "https://kubernetes.io/docs/"),
        ("docker", "https://docs.docker.com/"),
        ("postgresql", "https://www.postgresql.org/docs/"),
        ("tailwind", "https://tailwindcss.com/docs"),
        ("typescript", "https://www.typescriptlang.org/docs/"),
    ]
    .into_iter()
    .map(|(name, url)| (name.to_string(), url.to_string()))
    .collect()
}

fn default_doc_url_patterns() -> Vec<String> {
    [
        "https://{name}.readthedocs.io/",
        "https://docs.{name}.com/",
        "https://{name}.org/docs/",
        "https://{name}.org/documentation/",
        "https://{name}.dev/",
        "https://{name}.js.org/",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = DocsmithConfig::default();
        assert!(config.chunk_overlap_chars < config.chunk_max_chars);
        assert!(config.max_results_default <= config.max_results_ceiling);
        assert!(config.known_docs.contains_key("react"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: DocsmithConfig =
            serde_json::from_str(r#"{"max_pages_per_library": 5}"#).unwrap();
        assert_eq!(config.max_pages_per_library, 5);
        assert_eq!(config.crawl_concurrency, 8);
    }

    #[test]
    fn blocked_hosts_are_rejected() {
        let mut config = DocsmithConfig::default();
        config.blocked_domains.push("bad.example".to_string());
        assert!(!config.host_permitted("bad.example"));
        assert!(config.host_permitted("docs.example.com"));

        config.allowed_domains.push("docs.example.com".to_string());
        assert!(config.host_permitted("docs.example.com"));
        assert!(!config.host_permitted("other.example.com"));
    }
}
