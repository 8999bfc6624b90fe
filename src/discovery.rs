//! Documentation root discovery.
//!
//! Given a bare library name, derive an ordered list of candidate
//! documentation roots and probe them until one answers with a real page.
//! Candidate generation is a capability behind [`CandidateSource`] so the
//! heuristic policy can be swapped without touching the resolver.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info};
use url::Url;

use crate::config::DocsmithConfig;
use crate::types::DocsmithError;

/// Minimum body length for a probe response to count as a documentation page.
const MIN_PROBE_BODY_CHARS: usize = 64;

/// Produces an ordered list of candidate documentation roots for a library.
pub trait CandidateSource: Send + Sync {
    fn candidates(&self, library: &str) -> Vec<String>;
}

/// Default candidate policy: known-docs table, then hosting-convention
/// patterns, then GitHub fallbacks. Ordering is configuration, not contract.
pub struct PatternSource {
    known_docs: HashMap<String, String>,
    patterns: Vec<String>,
}

impl PatternSource {
    pub fn new(known_docs: HashMap<String, String>, patterns: Vec<String>) -> Self {
        Self {
            known_docs,
            patterns,
        }
    }

    pub fn from_config(config: &DocsmithConfig) -> Self {
        Self::new(config.known_docs.clone(), config.doc_url_patterns.clone())
    }
}

impl CandidateSource for PatternSource {
    fn candidates(&self, library: &str) -> Vec<String> {
        let name = library.to_lowercase();
        let mut out = Vec::new();

        if let Some(known) = self.known_docs.get(&name) {
            out.push(known.clone());
        }

        for pattern in &self.patterns {
            out.push(pattern.replace("{name}", &name));
        }

        // GitHub fallbacks, last resort before giving up.
        out.push(format!("https://github.com/{name}/{name}"));
        out.push(format!("https://github.com/{name}"));
        out.push(format!("https://{name}.github.io/"));

        out
    }
}

/// Probes candidate roots and picks the first reachable one.
pub struct DiscoveryResolver {
    client: reqwest::Client,
    source: Box<dyn CandidateSource>,
    probe_timeout: Duration,
    config: DocsmithConfig,
}

impl DiscoveryResolver {
    pub fn new(
        client: reqwest::Client,
        source: Box<dyn CandidateSource>,
        config: &DocsmithConfig,
    ) -> Self {
        Self {
            client,
            source,
            probe_timeout: config.request_timeout().min(Duration::from_secs(10)),
            config: config.clone(),
        }
    }

    /// Resolves a documentation root for `library`.
    ///
    /// An explicit URL short-circuits candidate generation but still gets a
    /// reachability check. Heuristic resolution probes candidates in order and
    /// accepts the first success; exhaustion is a `Discovery` error.
    pub async fn resolve(
        &self,
        library: &str,
        explicit_url: Option<&str>,
    ) -> Result<Url, DocsmithError> {
        if let Some(raw) = explicit_url {
            let url = Url::parse(raw)?;
            if self.probe(&url).await {
                return Ok(url);
            }
            return Err(DocsmithError::Discovery {
                library: library.to_string(),
                tried: 1,
            });
        }

        let candidates = self.source.candidates(library);
        let mut tried = 0usize;
        for candidate in &candidates {
            let Ok(url) = Url::parse(candidate) else {
                continue;
            };
            let permitted = url
                .host_str()
                .is_some_and(|host| self.config.host_permitted(host));
            if !permitted {
                debug!(%url, "skipping candidate outside domain policy");
                continue;
            }
            tried += 1;
            if self.probe(&url).await {
                info!(library, %url, "documentation root discovered");
                return Ok(url);
            }
        }

        Err(DocsmithError::Discovery {
            library: library.to_string(),
            tried,
        })
    }

    /// Lightweight reachability check: successful status and a non-trivial
    /// body. Network errors simply disqualify the candidate.
    async fn probe(&self, url: &Url) -> bool {
        let response = match self
            .client
            .get(url.clone())
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                debug!(%url, error = %err, "probe failed");
                return false;
            }
        };

        if !response.status().is_success() {
            return false;
        }

        match response.text().await {
            Ok(body) => body.trim().len() >= MIN_PROBE_BODY_CHARS,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_docs_come_first() {
        let mut known = HashMap::new();
        known.insert("react".to_string(), "https://react.dev/".to_string());
        let source = PatternSource::new(known, vec!["https://{name}.readthedocs.io/".to_string()]);

        let candidates = source.candidates("React");
        assert_eq!(candidates[0], "https://react.dev/");
        assert_eq!(candidates[1], "https://react.readthedocs.io/");
        assert!(candidates.iter().any(|c| c.contains("github.com/react")));
    }

    #[test]
    fn patterns_substitute_lowercased_name() {
        let source = PatternSource::new(HashMap::new(), vec!["https://docs.{name}.com/".to_string()]);
        let candidates = source.candidates("ExampleLib");
        assert_eq!(candidates[0], "https://docs.examplelib.com/");
    }

    #[tokio::test]
    async fn explicit_url_is_probed_not_searched() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/docs/");
                then.status(200).body("x".repeat(200));
            })
            .await;

        let config = DocsmithConfig::default();
        let resolver = DiscoveryResolver::new(
            reqwest::Client::new(),
            Box::new(PatternSource::from_config(&config)),
            &config,
        );

        let url = resolver
            .resolve("anything", Some(&server.url("/docs/")))
            .await
            .unwrap();
        assert_eq!(url.path(), "/docs/");
    }

    #[tokio::test]
    async fn blocked_candidates_are_never_probed() {
        struct Fixed;
        impl CandidateSource for Fixed {
            fn candidates(&self, _library: &str) -> Vec<String> {
                vec!["https://blocked.example/docs/".to_string()]
            }
        }

        let mut config = DocsmithConfig::default();
        config.blocked_domains.push("blocked.example".to_string());
        let resolver = DiscoveryResolver::new(reqwest::Client::new(), Box::new(Fixed), &config);

        let err = resolver.resolve("somelib", None).await.unwrap_err();
        match err {
            DocsmithError::Discovery { tried, .. } => assert_eq!(tried, 0),
            other => panic!("expected discovery error, got {other}"),
        }
    }

    #[tokio::test]
    async fn exhausted_candidates_surface_discovery_error() {
        struct Empty;
        impl CandidateSource for Empty {
            fn candidates(&self, _library: &str) -> Vec<String> {
                vec!["not a url".to_string()]
            }
        }

        let config = DocsmithConfig::default();
        let resolver =
            DiscoveryResolver::new(reqwest::Client::new(), Box::new(Empty), &config);

        let err = resolver.resolve("ghostlib", None).await.unwrap_err();
        match err {
            DocsmithError::Discovery { library, tried } => {
                assert_eq!(library, "ghostlib");
                assert_eq!(tried, 0);
            }
            other => panic!("expected discovery error, got {other}"),
        }
    }
}
