//! Query-side retrieval: searchers, fusion, reranking, and the engine

pub mod engine;
pub mod fusion;
pub mod rerank;

pub use engine::RetrievalEngine;
pub use fusion::reciprocal_rank_fusion;
pub use rerank::{HttpReranker, Reranker};

use crate::access::AccessPredicate;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::store::{ChunkFilter, DocumentStore, SearchResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which searchers a query runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Semantic,
    Lexical,
    #[default]
    Hybrid,
}

/// Per-call search options with defaulted fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Desired result count; clamped to the configured maximum
    #[serde(default)]
    pub match_count: Option<usize>,

    #[serde(default)]
    pub search_type: SearchType,

    /// Additional chunk-level restriction
    #[serde(default)]
    pub filter: ChunkFilter,

    /// Override the configured rerank toggle
    #[serde(default)]
    pub use_rerank: Option<bool>,

    /// Override the configured RRF constant
    #[serde(default)]
    pub rrf_k: Option<u32>,
}

/// A degraded searcher attached to an otherwise successful response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchWarning {
    pub searcher: String,
    pub message: String,
}

/// Search response: results plus any searcher degradations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub count: usize,
    #[serde(default)]
    pub warnings: Vec<SearchWarning>,
}

/// One retrieval source. Hybrid queries fan out over several of these and
/// fuse the ranked lists.
#[async_trait]
pub trait Searcher: Send + Sync {
    fn name(&self) -> &str;

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: &ChunkFilter,
        predicate: &AccessPredicate,
    ) -> Result<Vec<SearchResult>>;
}

/// Dense retrieval: embeds the query and asks the store for nearest chunks
pub struct SemanticSearcher {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
}

impl SemanticSearcher {
    pub fn new(store: Arc<dyn DocumentStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }
}

#[async_trait]
impl Searcher for SemanticSearcher {
    fn name(&self) -> &str {
        "semantic"
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: &ChunkFilter,
        predicate: &AccessPredicate,
    ) -> Result<Vec<SearchResult>> {
        let query_embedding = self.embedder.embed(query).await?;
        self.store
            .semantic_search(&query_embedding, limit, filter, predicate)
            .await
    }
}

/// Lexical retrieval over the store's text index
pub struct LexicalSearcher {
    store: Arc<dyn DocumentStore>,
}

impl LexicalSearcher {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Searcher for LexicalSearcher {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: &ChunkFilter,
        predicate: &AccessPredicate,
    ) -> Result<Vec<SearchResult>> {
        self.store.lexical_search(query, limit, filter, predicate).await
    }
}
