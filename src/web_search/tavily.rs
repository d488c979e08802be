//! Tavily search API client.

use super::{WebSearchProvider, WebSnippet};
use crate::config::{Settings, WebSearchSettings};
use crate::error::{KihubError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
    topic: &'a str,
    search_depth: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    score: Option<f32>,
}

/// Web search through the Tavily API.
pub struct TavilySearch {
    client: reqwest::Client,
    api_key: String,
    topic: String,
    endpoint: String,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            topic: "general".to_string(),
            endpoint: TAVILY_ENDPOINT.to_string(),
        })
    }

    /// Create a client from settings; reads the API key from the environment.
    pub fn from_settings(settings: &WebSearchSettings) -> Result<Self> {
        let api_key = Settings::api_key(&settings.api_key_env)?;
        Ok(Self::new(api_key, Duration::from_secs(settings.timeout_secs))?
            .with_topic(&settings.topic))
    }

    pub fn with_topic(mut self, topic: &str) -> Self {
        self.topic = topic.to_string();
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    fn into_snippets(response: SearchResponse) -> Vec<WebSnippet> {
        response
            .results
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .enumerate()
            .map(|(i, r)| WebSnippet {
                title: if r.title.is_empty() { r.url.clone() } else { r.title },
                url: r.url,
                text: r.content,
                rank: i + 1,
                score: r.score,
            })
            .collect()
    }
}

#[async_trait]
impl WebSearchProvider for TavilySearch {
    #[instrument(skip(self, query))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSnippet>> {
        let request = SearchRequest {
            query,
            max_results,
            topic: &self.topic,
            search_depth: "basic",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(KihubError::WebSearchUnavailable(format!(
                "Tavily search failed: {}",
                response.status()
            )));
        }

        let payload: SearchResponse = response.json().await?;
        let snippets = Self::into_snippets(payload);
        debug!("Tavily returned {} results", snippets.len());
        Ok(snippets)
    }

    fn name(&self) -> &str {
        "tavily"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let payload: SearchResponse = serde_json::from_str(
            r#"{
                "query": "rust",
                "results": [
                    {"title": "Rust", "url": "https://www.rust-lang.org", "content": "A language", "score": 0.93},
                    {"url": "https://doc.rust-lang.org/book/", "content": "The book"},
                    {"title": "Empty", "url": "", "content": "dropped"}
                ]
            }"#,
        )
        .unwrap();

        let snippets = TavilySearch::into_snippets(payload);
        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0].score, Some(0.93));
        assert_eq!(snippets[1].title, "https://doc.rust-lang.org/book/");
        assert_eq!(snippets[1].rank, 2);
    }

    #[test]
    fn test_request_body() {
        let body = serde_json::to_value(SearchRequest {
            query: "rust",
            max_results: 3,
            topic: "general",
            search_depth: "basic",
        })
        .unwrap();
        assert_eq!(body["max_results"], 3);
        assert_eq!(body["topic"], "general");
    }
}
