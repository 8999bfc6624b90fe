//! Polite bounded BFS crawler.
//!
//! Pages are fetched breadth-first from the documentation root in bounded
//! concurrent batches, with a minimum delay between requests to the same
//! host. Per-page failures are logged and skipped; they never abort a crawl.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::DocsmithConfig;
use crate::types::{DocsmithError, FetchedDoc};

/// Words in a URL path that mark it as likely documentation.
const DOC_INDICATORS: &[&str] = &[
    "doc",
    "guide",
    "tutorial",
    "api",
    "reference",
    "manual",
    "help",
    "wiki",
    "learn",
    "getting-started",
];

/// Everything a finished crawl produced.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub docs: Vec<FetchedDoc>,
    /// Pages that failed to fetch and were skipped.
    pub failed_pages: usize,
    /// True when the crawl stopped early on a deadline.
    pub deadline_hit: bool,
}

#[derive(Clone)]
struct CrawlLimits {
    max_pages: usize,
    max_depth: usize,
    max_links_per_page: usize,
    concurrency: usize,
    request_delay: Duration,
    request_timeout: Duration,
}

/// Breadth-first crawler scoped to one documentation site.
pub struct Crawler {
    client: reqwest::Client,
    limits: CrawlLimits,
    /// Last request time per host, for the politeness delay.
    host_gate: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Crawler {
    pub fn new(client: reqwest::Client, config: &DocsmithConfig) -> Self {
        Self {
            client,
            limits: CrawlLimits {
                max_pages: config.max_pages_per_library,
                max_depth: config.max_depth,
                max_links_per_page: config.max_links_per_page,
                concurrency: config.crawl_concurrency.max(1),
                request_delay: config.request_delay(),
                request_timeout: config.request_timeout(),
            },
            host_gate: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Crawls from `root`, staying on its host and under its path unless a
    /// link looks like documentation. Stops at the page budget, the depth
    /// limit, or `deadline`, whichever comes first.
    pub async fn crawl(
        &self,
        library: &str,
        root: &Url,
        deadline: Option<Instant>,
    ) -> CrawlOutcome {
        let mut outcome = CrawlOutcome::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<(Url, usize)> = VecDeque::new();

        let root_normalized = normalize_url(root.clone());
        visited.insert(root_normalized.as_str().to_string());
        frontier.push_back((root_normalized, 0));

        while !frontier.is_empty() && outcome.docs.len() < self.limits.max_pages {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    info!(library, pages = outcome.docs.len(), "crawl deadline hit");
                    outcome.deadline_hit = true;
                    break;
                }
            }

            let budget = self.limits.max_pages - outcome.docs.len();
            let batch_size = self.limits.concurrency.min(budget).min(frontier.len());
            let mut batch = JoinSet::new();
            for _ in 0..batch_size {
                let Some((url, depth)) = frontier.pop_front() else {
                    break;
                };
                let client = self.client.clone();
                let gate = Arc::clone(&self.host_gate);
                let limits = self.limits.clone();
                let library = library.to_string();
                batch.spawn(async move {
                    let result = fetch_page(&client, &gate, &limits, &library, url, depth).await;
                    (depth, result)
                });
            }

            while let Some(joined) = batch.join_next().await {
                let Ok((depth, result)) = joined else {
                    outcome.failed_pages += 1;
                    continue;
                };
                match result {
                    Ok(doc) => {
                        if depth < self.limits.max_depth {
                            for link in extract_links(
                                &doc.html,
                                &doc.url,
                                root,
                                self.limits.max_links_per_page,
                            ) {
                                if visited.insert(link.as_str().to_string()) {
                                    frontier.push_back((link, depth + 1));
                                }
                            }
                        }
                        outcome.docs.push(doc);
                    }
                    Err(err) => {
                        warn!(library, error = %err, "page fetch failed, skipping");
                        outcome.failed_pages += 1;
                    }
                }
            }
        }

        info!(
            library,
            pages = outcome.docs.len(),
            failed = outcome.failed_pages,
            "crawl finished"
        );
        outcome
    }
}

async fn fetch_page(
    client: &reqwest::Client,
    gate: &Mutex<HashMap<String, Instant>>,
    limits: &CrawlLimits,
    library: &str,
    url: Url,
    depth: usize,
) -> Result<FetchedDoc, DocsmithError> {
    if let Some(host) = url.host_str() {
        wait_for_host_slot(gate, host, limits.request_delay).await;
    }

    debug!(library, %url, depth, "fetching page");
    let response = client
        .get(url.clone())
        .timeout(limits.request_timeout)
        .send()
        .await
        .map_err(|err| DocsmithError::Fetch {
            url: url.to_string(),
            reason: err.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(DocsmithError::Fetch {
            url: url.to_string(),
            reason: format!("status {status}"),
        });
    }

    let html = response.text().await.map_err(|err| DocsmithError::Fetch {
        url: url.to_string(),
        reason: err.to_string(),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(html.as_bytes());
    let content_hash: String = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();

    Ok(FetchedDoc {
        url,
        library: library.to_string(),
        depth,
        fetched_at: Utc::now(),
        content_hash,
        html,
    })
}

/// Sleeps until the per-host politeness delay has elapsed, then claims the
/// next slot so concurrent workers serialize against the same host.
async fn wait_for_host_slot(
    gate: &Mutex<HashMap<String, Instant>>,
    host: &str,
    delay: Duration,
) {
    let slot = {
        let mut hosts = gate.lock().await;
        let now = Instant::now();
        let slot = match hosts.get(host) {
            Some(last) => (*last + delay).max(now),
            None => now,
        };
        hosts.insert(host.to_string(), slot);
        slot
    };
    tokio::time::sleep_until(slot).await;
}

/// Pulls candidate links out of a page. Runs entirely in sync scope because
/// `scraper::Html` is not `Send`.
fn extract_links(html: &str, page_url: &Url, root: &Url, max_links: usize) -> Vec<Url> {
    let document = scraper::Html::parse_document(html);
    let Ok(selector) = scraper::Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut links = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for anchor in document.select(&selector) {
        if links.len() >= max_links {
            break;
        }
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(joined) = page_url.join(href) else {
            continue;
        };
        let url = normalize_url(joined);
        if url.scheme() != "http" && url.scheme() != "https" {
            continue;
        }
        if !in_scope(&url, root) {
            continue;
        }
        if seen.insert(url.as_str().to_string()) {
            links.push(url);
        }
    }
    links
}

/// A link is in scope when it stays on the root's host and either stays under
/// the root path or carries a documentation indicator in its path.
fn in_scope(url: &Url, root: &Url) -> bool {
    if url.host_str() != root.host_str() {
        return false;
    }
    let path = url.path().to_lowercase();
    if path.starts_with(&root.path().to_lowercase()) {
        return true;
    }
    DOC_INDICATORS
        .iter()
        .any(|indicator| path.contains(indicator))
}

/// Strips fragments so `page#a` and `page#b` dedupe to one visit.
fn normalize_url(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}
