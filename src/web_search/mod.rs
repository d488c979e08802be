//! Best-effort web search.
//!
//! Web results enrich an answer but never block it: provider errors and
//! timeouts are logged and turn into an empty result.

mod tavily;

pub use tavily::TavilySearch;

use crate::config::WebSearchSettings;
use crate::error::{KihubError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// A single web result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSnippet {
    pub url: String,
    pub title: String,
    pub text: String,
    /// 1-based position after deduplication.
    pub rank: usize,
    /// Provider relevance score, if it reports one.
    pub score: Option<f32>,
}

/// Trait for web search backends.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    /// Return up to `max_results` results, best first.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSnippet>>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}

/// Normalize a URL for duplicate detection: fragment dropped, trailing slash trimmed.
///
/// Returns `None` for strings that are not absolute URLs.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = url::Url::parse(raw.trim()).ok()?;
    url.set_fragment(None);
    Some(url.as_str().trim_end_matches('/').to_string())
}

/// Wraps an optional provider with a timeout, deduplication and ranking.
#[derive(Clone)]
pub struct WebSearchAdapter {
    provider: Option<Arc<dyn WebSearchProvider>>,
    timeout: Duration,
}

impl WebSearchAdapter {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

    pub fn new(provider: Arc<dyn WebSearchProvider>, timeout: Duration) -> Self {
        Self {
            provider: Some(provider),
            timeout,
        }
    }

    /// An adapter without a provider; every search returns nothing.
    pub fn disabled() -> Self {
        Self {
            provider: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Build the configured adapter. Missing credentials disable web search.
    pub fn from_settings(settings: &WebSearchSettings) -> Self {
        if !settings.enabled {
            return Self::disabled();
        }

        match settings.provider.to_lowercase().as_str() {
            "tavily" => match TavilySearch::from_settings(settings) {
                Ok(provider) => Self::new(
                    Arc::new(provider),
                    Duration::from_secs(settings.timeout_secs),
                ),
                Err(e) => {
                    warn!("Web search disabled: {}", e);
                    Self::disabled()
                }
            },
            other => {
                warn!("Unknown web search provider {}, web search disabled", other);
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Search the web, failing with `WebSearchUnavailable` on timeout or provider error.
    pub async fn try_search(&self, query: &str, max_results: usize) -> Result<Vec<WebSnippet>> {
        let Some(provider) = &self.provider else {
            return Ok(Vec::new());
        };
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let raw = tokio::time::timeout(self.timeout, provider.search(query, max_results))
            .await
            .map_err(|_| {
                KihubError::WebSearchUnavailable(format!(
                    "{} did not answer within {:?}",
                    provider.name(),
                    self.timeout
                ))
            })?
            .map_err(|e| match e {
                KihubError::WebSearchUnavailable(_) => e,
                other => KihubError::WebSearchUnavailable(format!("{}: {}", provider.name(), other)),
            })?;

        Ok(dedup_and_rank(raw, max_results))
    }

    /// Search the web. Failures are logged and yield an empty result.
    #[instrument(skip(self, query))]
    pub async fn search(&self, query: &str, max_results: usize) -> Vec<WebSnippet> {
        match self.try_search(query, max_results).await {
            Ok(snippets) => {
                debug!("Web search returned {} results", snippets.len());
                snippets
            }
            Err(e) => {
                warn!("Continuing without web results: {}", e);
                Vec::new()
            }
        }
    }
}

/// Drop invalid and duplicate URLs (first wins), keep `max_results`, rank 1..=n.
fn dedup_and_rank(raw: Vec<WebSnippet>, max_results: usize) -> Vec<WebSnippet> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .filter_map(|snippet| {
            let key = normalize_url(&snippet.url)?;
            seen.insert(key).then_some(snippet)
        })
        .take(max_results)
        .enumerate()
        .map(|(i, snippet)| WebSnippet {
            rank: i + 1,
            ..snippet
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        results: Vec<WebSnippet>,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl WebSearchProvider for Scripted {
        async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<WebSnippet>> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(KihubError::WebSearchUnavailable("HTTP 500".to_string()));
            }
            Ok(self.results.clone())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn snippet(url: &str, title: &str) -> WebSnippet {
        WebSnippet {
            url: url.to_string(),
            title: title.to_string(),
            text: format!("About {}", title),
            rank: 0,
            score: None,
        }
    }

    fn adapter(results: Vec<WebSnippet>, delay: Duration, fail: bool) -> WebSearchAdapter {
        WebSearchAdapter::new(
            Arc::new(Scripted {
                results,
                delay,
                fail,
            }),
            Duration::from_millis(50),
        )
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://example.com/page/#section").as_deref(),
            Some("https://example.com/page")
        );
        assert_eq!(
            normalize_url("https://example.com/page"),
            normalize_url("https://example.com/page/")
        );
        assert_eq!(normalize_url("not a url"), None);
    }

    #[tokio::test]
    async fn test_dedup_truncate_and_rank() {
        let adapter = adapter(
            vec![
                snippet("https://a.example/x", "A"),
                snippet("https://a.example/x/#top", "A again"),
                snippet("garbage", "Broken"),
                snippet("https://b.example", "B"),
                snippet("https://c.example", "C"),
            ],
            Duration::ZERO,
            false,
        );

        let results = adapter.search("query", 2).await;
        let titles: Vec<_> = results.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
        assert_eq!(results.iter().map(|s| s.rank).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_timeout_yields_empty() {
        let adapter = adapter(
            vec![snippet("https://a.example", "A")],
            Duration::from_millis(500),
            false,
        );

        assert!(adapter.search("query", 3).await.is_empty());
        assert!(matches!(
            adapter.try_search("query", 3).await,
            Err(KihubError::WebSearchUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_provider_error_yields_empty() {
        let adapter = adapter(vec![], Duration::ZERO, true);
        assert!(adapter.search("query", 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_adapter() {
        let adapter = WebSearchAdapter::disabled();
        assert!(!adapter.is_enabled());
        assert!(adapter.search("query", 3).await.is_empty());
    }
}
