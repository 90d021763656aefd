//! The service facade wiring every component together

use crate::access::{can_write, AccessPredicate, Principal};
use crate::config::StacksConfig;
use crate::embedding::{Embedder, OllamaEmbedder};
use crate::episodes::{EpisodeSink, HttpEpisodeSink};
use crate::error::{CoreError, Result};
use crate::ingest::{IngestionPipeline, IngestionResult, ScrapedContent};
use crate::search::{
    HttpReranker, Reranker, RetrievalEngine, SearchOptions, SearchResponse, Searcher,
};
use crate::store::{DocumentCounts, DocumentStore, SqliteDocumentStore};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Retrieval and ingestion service coordinating all components
pub struct StacksService {
    config: StacksConfig,
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    pipeline: IngestionPipeline,
    engine: RetrievalEngine,
}

impl std::fmt::Debug for StacksService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StacksService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StacksService {
    /// Create a service with the default component wiring: an HTTP embedder,
    /// a SQLite store, and (when configured) the HTTP episode sink and
    /// reranker.
    pub async fn new(config: StacksConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        info!("Initializing retrieval service");

        let embedder: Arc<dyn Embedder> =
            Arc::new(OllamaEmbedder::new(config.embedding.clone()));

        let store: Arc<dyn DocumentStore> = Arc::new(
            SqliteDocumentStore::connect(&config.store, config.search.lexical.clone()).await?,
        );
        store.initialize().await?;

        let sink: Option<Arc<dyn EpisodeSink>> = if config.episodes.enabled {
            Some(Arc::new(HttpEpisodeSink::new(config.episodes.clone())))
        } else {
            None
        };

        let reranker: Option<Arc<dyn Reranker>> =
            if config.search.use_rerank && !config.search.rerank.endpoint.is_empty() {
                Some(Arc::new(HttpReranker::new(config.search.rerank.clone())))
            } else {
                None
            };

        StacksServiceBuilder::new()
            .with_store_handle(store)
            .with_embedder_handle(embedder)
            .with_episode_sink_option(sink)
            .with_reranker_option(reranker)
            .build(config)
    }

    /// Builder for custom component wiring (mock embedders, in-memory
    /// sinks, extra searchers).
    pub fn builder() -> StacksServiceBuilder {
        StacksServiceBuilder::new()
    }

    /// Ingest one scraped unit.
    pub async fn ingest(&self, scraped: ScrapedContent) -> Result<IngestionResult> {
        self.pipeline.ingest(scraped).await
    }

    /// Bulk import with bounded concurrency.
    pub async fn ingest_batch(&self, items: Vec<ScrapedContent>) -> Vec<IngestionResult> {
        self.pipeline.ingest_batch(items).await
    }

    /// Answer a query for a principal.
    pub async fn search(
        &self,
        query: &str,
        principal: &Principal,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        self.engine.search(query, principal, options).await
    }

    /// Delete a document and its chunks. Only the owner or an admin may
    /// delete; non-admin callers cannot tell a missing document from an
    /// inaccessible one.
    pub async fn delete_document(&self, document_id: Uuid, principal: &Principal) -> Result<bool> {
        match self.store.get_document(document_id).await? {
            Some(document) => {
                if can_write(principal, &document.access()) {
                    let deleted = self.store.delete_document(document_id).await?;
                    info!(document_id = %document_id, "Deleted document");
                    Ok(deleted)
                } else {
                    Err(CoreError::NotFound("document not found".to_string()))
                }
            }
            None if principal.is_admin => Ok(false),
            None => Err(CoreError::NotFound("document not found".to_string())),
        }
    }

    /// Principal-scoped counts of documents, chunks, and distinct sources.
    pub async fn document_counts(&self, principal: &Principal) -> Result<DocumentCounts> {
        let predicate = AccessPredicate::compile(principal);
        self.store.document_counts(&predicate).await
    }

    pub fn config(&self) -> &StacksConfig {
        &self.config
    }

    /// The vector dimension the embedder reports; equals the store's by
    /// construction.
    pub fn embedding_dimension(&self) -> usize {
        self.embedder.dimension()
    }
}

/// Builder for custom service wiring
#[derive(Default)]
pub struct StacksServiceBuilder {
    store: Option<Arc<dyn DocumentStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    sink: Option<Arc<dyn EpisodeSink>>,
    reranker: Option<Arc<dyn Reranker>>,
    graph_searcher: Option<Arc<dyn Searcher>>,
}

impl StacksServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: impl DocumentStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn with_store_handle(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_embedder(mut self, embedder: impl Embedder + 'static) -> Self {
        self.embedder = Some(Arc::new(embedder));
        self
    }

    pub fn with_embedder_handle(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_episode_sink(mut self, sink: Arc<dyn EpisodeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn with_episode_sink_option(mut self, sink: Option<Arc<dyn EpisodeSink>>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    fn with_reranker_option(mut self, reranker: Option<Arc<dyn Reranker>>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn with_graph_searcher(mut self, searcher: Arc<dyn Searcher>) -> Self {
        self.graph_searcher = Some(searcher);
        self
    }

    /// Assemble the service. The store must already be initialized when
    /// injected directly. Refuses to start when the embedder and store
    /// disagree on the vector dimension.
    pub fn build(self, config: StacksConfig) -> Result<StacksService> {
        let store = self
            .store
            .ok_or_else(|| CoreError::Config("no document store configured".to_string()))?;
        let embedder = self
            .embedder
            .ok_or_else(|| CoreError::Config("no embedder configured".to_string()))?;

        if embedder.dimension() != store.vector_dimension() {
            return Err(CoreError::DimensionMismatch {
                expected: store.vector_dimension(),
                actual: embedder.dimension(),
            });
        }

        let pipeline = IngestionPipeline::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            config.chunking.clone(),
            config.ingestion.clone(),
            config.episodes.clone(),
            self.sink,
        );

        let mut engine = RetrievalEngine::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            config.search.clone(),
        );
        if let Some(reranker) = self.reranker {
            engine = engine.with_reranker(reranker);
        }
        if let Some(graph) = self.graph_searcher {
            engine = engine.with_graph_searcher(graph);
        }

        Ok(StacksService {
            config,
            store,
            embedder,
            pipeline,
            engine,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use async_trait::async_trait;

    struct FixedEmbedder {
        dimension: usize,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; self.dimension])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0; self.dimension]).collect())
        }
    }

    async fn memory_store(dimension: usize) -> SqliteDocumentStore {
        let config = crate::config::StoreConfig {
            database_url: "sqlite::memory:".to_string(),
            vector_dimension: dimension,
        };
        let store =
            SqliteDocumentStore::connect(&config, crate::config::LexicalConfig::default())
                .await
                .unwrap();
        store.initialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_builder_requires_components() {
        let err = StacksService::builder()
            .build(StacksConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadInput);
    }

    #[tokio::test]
    async fn test_builder_rejects_dimension_mismatch() {
        let store = memory_store(768).await;
        let err = StacksService::builder()
            .with_store(store)
            .with_embedder(FixedEmbedder { dimension: 1024 })
            .build(StacksConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
    }

    #[tokio::test]
    async fn test_builder_assembles_service() {
        let store = memory_store(768).await;
        let service = StacksService::builder()
            .with_store(store)
            .with_embedder(FixedEmbedder { dimension: 768 })
            .build(StacksConfig::default())
            .unwrap();
        assert_eq!(service.config().store.vector_dimension, 768);
    }
}
