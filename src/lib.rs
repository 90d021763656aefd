//! The Stacks Retrieval Library
//!
//! A multi-modal retrieval and ingestion engine that integrates:
//! - Content-addressed document and chunk storage with dense and lexical indexes
//! - Parallel semantic + lexical search fused with reciprocal rank fusion
//! - Row-level access control applied inside every store query
//! - An optional temporal episode sink for time-anchored document records
//!
//! # Example
//!
//! ```rust,no_run
//! use the_stacks::{ScrapedContent, SearchOptions, SourceType, StacksConfig, StacksService};
//! use the_stacks::access::Principal;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = StacksConfig::default();
//!     let service = StacksService::new(config).await?;
//!
//!     let result = service
//!         .ingest(ScrapedContent {
//!             content: "Rust ownership explained...".to_string(),
//!             title: "Ownership".to_string(),
//!             source: "https://example.com/ownership".to_string(),
//!             source_type: SourceType::Web,
//!             metadata: Default::default(),
//!             reference_time: None,
//!             chapters: vec![],
//!             owner_id: "user-1".to_string(),
//!             owner_email: "user@example.com".to_string(),
//!             options: Default::default(),
//!         })
//!         .await?;
//!     println!("Ingested {} chunks", result.chunks_created);
//!
//!     let principal = Principal::user("user-1", "user@example.com");
//!     let response = service
//!         .search("how does ownership work", &principal, &SearchOptions::default())
//!         .await?;
//!     println!("Found {} results", response.count);
//!     Ok(())
//! }
//! ```

pub mod access;
pub mod config;
pub mod embedding;
pub mod episodes;
pub mod error;
pub mod ingest;
pub mod search;
pub mod service;
pub mod store;

// Re-export main types
pub use access::{AccessClause, AccessPredicate, DocumentAccess, Principal};
pub use config::{
    ChunkingConfig, EmbeddingConfig, EpisodeConfig, IngestionConfig, LexicalConfig, RerankConfig,
    SearchConfig, StacksConfig, StoreConfig,
};
pub use embedding::{CacheStats, Embedder, OllamaEmbedder};
pub use episodes::{
    build_episodes, DocumentLocator, EpisodeRecord, EpisodeSink, HttpEpisodeSink,
    MemoryEpisodeSink,
};
pub use error::{CoreError, ErrorKind, Result};
pub use ingest::{
    canonical_source_key, Chapter, ChunkPiece, ContentChunker, EpisodeKind, IngestOptions,
    IngestionPipeline, IngestionResult, ScrapedContent, SplitBehavior,
};
pub use search::{
    reciprocal_rank_fusion, HttpReranker, Reranker, RetrievalEngine, SearchOptions,
    SearchResponse, SearchType, SearchWarning, Searcher,
};
pub use service::{StacksService, StacksServiceBuilder};
pub use store::{
    Chunk, ChunkFilter, Document, DocumentCounts, DocumentStore, Metadata, SearchResult,
    SourceType, SqliteDocumentStore,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
