//! The retrieval engine: concurrent fan-out, fusion, reranking, access

use super::fusion::reciprocal_rank_fusion;
use super::rerank::Reranker;
use super::{
    LexicalSearcher, SearchOptions, SearchResponse, SearchType, SearchWarning, Searcher,
    SemanticSearcher,
};
use crate::access::{AccessPredicate, Principal};
use crate::config::SearchConfig;
use crate::embedding::Embedder;
use crate::error::{Result, SearchError};
use crate::store::{DocumentStore, SearchResult};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Runs semantic, lexical, and optional graph searchers concurrently, fuses
/// their rankings, optionally reranks, and enforces document access
pub struct RetrievalEngine {
    semantic: Arc<dyn Searcher>,
    lexical: Arc<dyn Searcher>,
    graph: Option<Arc<dyn Searcher>>,
    reranker: Option<Arc<dyn Reranker>>,
    config: SearchConfig,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        config: SearchConfig,
    ) -> Self {
        Self {
            semantic: Arc::new(SemanticSearcher::new(Arc::clone(&store), embedder)),
            lexical: Arc::new(LexicalSearcher::new(store)),
            graph: None,
            reranker: None,
            config,
        }
    }

    /// Engine over explicit searchers; used for custom sources and tests.
    pub fn with_searchers(
        semantic: Arc<dyn Searcher>,
        lexical: Arc<dyn Searcher>,
        config: SearchConfig,
    ) -> Self {
        Self {
            semantic,
            lexical,
            graph: None,
            reranker: None,
            config,
        }
    }

    /// Attach an optional third searcher (e.g. a knowledge-graph source)
    /// that participates in hybrid queries.
    pub fn with_graph_searcher(mut self, searcher: Arc<dyn Searcher>) -> Self {
        self.graph = Some(searcher);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Answer a query for a principal. Individual searcher failures degrade
    /// to warnings; the call fails only when every requested searcher fails
    /// or the request deadline expires.
    pub async fn search(
        &self,
        query: &str,
        principal: &Principal,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidRequest("query is empty".to_string()).into());
        }

        let match_count = options
            .match_count
            .unwrap_or(self.config.default_match_count)
            .clamp(1, self.config.max_match_count);
        let fetch_count = match_count * self.config.over_fetch;
        let predicate = AccessPredicate::compile(principal);

        let searchers: Vec<Arc<dyn Searcher>> = match options.search_type {
            SearchType::Semantic => vec![Arc::clone(&self.semantic)],
            SearchType::Lexical => vec![Arc::clone(&self.lexical)],
            SearchType::Hybrid => {
                let mut all = vec![Arc::clone(&self.semantic), Arc::clone(&self.lexical)];
                if let Some(graph) = &self.graph {
                    all.push(Arc::clone(graph));
                }
                all
            }
        };

        let deadline = Duration::from_millis(self.config.request_deadline_ms);
        let (lists, mut warnings) = timeout(
            deadline,
            self.run_searchers(&searchers, query, fetch_count, options, &predicate),
        )
        .await
        .map_err(|_| SearchError::DeadlineExceeded)?;

        if warnings.len() == searchers.len() {
            let detail = warnings
                .iter()
                .map(|w| format!("{}: {}", w.searcher, w.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SearchError::AllSearchersFailed(detail).into());
        }

        let mut results = match options.search_type {
            SearchType::Hybrid => {
                let k = options.rrf_k.unwrap_or(self.config.rrf_k);
                reciprocal_rank_fusion(&lists, k)
            }
            _ => lists.into_iter().next().unwrap_or_default(),
        };

        let use_rerank = options.use_rerank.unwrap_or(self.config.use_rerank);
        if use_rerank {
            if let Some(reranker) = &self.reranker {
                let take = match_count * self.config.rerank.over_fetch.max(1);
                results.truncate(take);
                match reranker.rerank(query, results.clone()).await {
                    Ok(reranked) => results = reranked,
                    Err(e) => {
                        // Degrade gracefully: keep the fused order
                        warn!("Reranker failed, returning unreranked results: {}", e);
                        warnings.push(SearchWarning {
                            searcher: "reranker".to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        results.truncate(match_count);

        info!(
            query_len = query.len(),
            results = results.len(),
            warnings = warnings.len(),
            "Search completed"
        );

        Ok(SearchResponse {
            count: results.len(),
            results,
            warnings,
        })
    }

    /// Run the given searchers concurrently. Failures and per-searcher
    /// timeouts contribute an empty list plus a warning.
    async fn run_searchers(
        &self,
        searchers: &[Arc<dyn Searcher>],
        query: &str,
        fetch_count: usize,
        options: &SearchOptions,
        predicate: &AccessPredicate,
    ) -> (Vec<Vec<SearchResult>>, Vec<SearchWarning>) {
        let per_searcher = Duration::from_millis(self.config.searcher_timeout_ms);

        let futures = searchers.iter().map(|searcher| {
            let searcher = Arc::clone(searcher);
            async move {
                let name = searcher.name().to_string();
                match timeout(
                    per_searcher,
                    searcher.search(query, fetch_count, &options.filter, predicate),
                )
                .await
                {
                    Ok(Ok(results)) => {
                        debug!(searcher = %name, results = results.len(), "Searcher finished");
                        (results, None)
                    }
                    Ok(Err(e)) => {
                        warn!(searcher = %name, "Searcher failed: {}", e);
                        (
                            vec![],
                            Some(SearchWarning {
                                searcher: name,
                                message: e.to_string(),
                            }),
                        )
                    }
                    Err(_) => {
                        warn!(searcher = %name, "Searcher timed out");
                        (
                            vec![],
                            Some(SearchWarning {
                                searcher: name,
                                message: "timed out".to_string(),
                            }),
                        )
                    }
                }
            }
        });

        let outcomes = join_all(futures).await;

        let mut lists = Vec::with_capacity(outcomes.len());
        let mut warnings = Vec::new();
        for (results, warning) in outcomes {
            lists.push(results);
            if let Some(warning) = warning {
                warnings.push(warning);
            }
        }
        (lists, warnings)
    }
}
