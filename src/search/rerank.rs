//! Cross-encoder reranking over fused results

use crate::config::RerankConfig;
use crate::error::{Result, SearchError};
use crate::store::SearchResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Reorders results by cross-encoder relevance to the query
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, results: Vec<SearchResult>) -> Result<Vec<SearchResult>>;
}

/// HTTP reranker against a cross-encoder service
pub struct HttpReranker {
    client: reqwest::Client,
    config: RerankConfig,
}

/// Rerank API request
#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<&'a str>,
}

/// Rerank API response
#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankItem>,
}

#[derive(Debug, Deserialize)]
struct RerankItem {
    index: usize,
    relevance_score: f64,
}

impl HttpReranker {
    pub fn new(config: RerankConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    fn api_url(&self) -> String {
        format!("{}/rerank", self.config.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, results: Vec<SearchResult>) -> Result<Vec<SearchResult>> {
        if results.is_empty() {
            return Ok(results);
        }

        let request = RerankRequest {
            model: &self.config.model,
            query,
            documents: results.iter().map(|r| r.content.as_str()).collect(),
        };

        let response = timeout(
            Duration::from_secs(self.config.timeout_secs),
            self.client.post(self.api_url()).json(&request).send(),
        )
        .await
        .map_err(|_| SearchError::RerankFailed("request timed out".to_string()))?
        .map_err(|e| SearchError::RerankFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SearchError::RerankFailed(format!("{}: {}", status, message)).into());
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| SearchError::RerankFailed(e.to_string()))?;

        let mut reranked = Vec::with_capacity(parsed.results.len());
        for item in parsed.results {
            let original = results.get(item.index).ok_or_else(|| {
                SearchError::RerankFailed(format!(
                    "reranker returned out-of-range index {}",
                    item.index
                ))
            })?;
            let mut result = original.clone();
            result.similarity = item.relevance_score;
            reranked.push(result);
        }

        debug!(count = reranked.len(), "Reranked results");
        Ok(reranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url() {
        let reranker = HttpReranker::new(RerankConfig {
            endpoint: "http://localhost:8787/".to_string(),
            model: "bge-reranker-base".to_string(),
            over_fetch: 3,
            timeout_secs: 5,
        });
        assert_eq!(reranker.api_url(), "http://localhost:8787/rerank");
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"results": [{"index": 1, "relevance_score": 0.93}, {"index": 0, "relevance_score": 0.41}]}"#;
        let parsed: RerankResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].index, 1);
        assert!((parsed.results[0].relevance_score - 0.93).abs() < 1e-9);
    }
}
