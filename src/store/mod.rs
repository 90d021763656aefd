//! Document and chunk storage: records, search contracts, and backends

mod sqlite;

pub use sqlite::SqliteDocumentStore;

use crate::access::{AccessPredicate, DocumentAccess};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata maps carried by documents and chunks
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Kind of source a document was ingested from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Web,
    Youtube,
    Article,
    File,
    Other,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Web => "web",
            SourceType::Youtube => "youtube",
            SourceType::Article => "article",
            SourceType::File => "file",
            SourceType::Other => "other",
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "web" => Ok(SourceType::Web),
            "youtube" => Ok(SourceType::Youtube),
            "article" => Ok(SourceType::Article),
            "file" => Ok(SourceType::File),
            "other" => Ok(SourceType::Other),
            _ => Err(format!("unknown source type: {}", s)),
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub source: String,
    pub source_type: SourceType,
    /// Canonical dedupe key derived from `source`
    pub source_key: String,
    pub content: String,
    pub metadata: Metadata,
    pub owner_id: String,
    pub owner_email: String,
    pub is_public: bool,
    pub shared_with: Vec<String>,
    pub group_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// The ownership fields access decisions read.
    pub fn access(&self) -> DocumentAccess {
        DocumentAccess {
            owner_id: self.owner_id.clone(),
            owner_email: self.owner_email.clone(),
            is_public: self.is_public,
            shared_with: self.shared_with.clone(),
            group_ids: self.group_ids.clone(),
        }
    }
}

/// A persisted chunk with its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    /// 0-based position within the document
    pub index: usize,
    pub content: String,
    pub token_count: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// A single search hit, hydrated with its parent document's display fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    /// Source-specific relevance score; carries the fused score after RRF
    pub similarity: f64,
    pub metadata: Metadata,
    pub document_title: String,
    pub document_source: String,
}

/// Additional chunk-level restriction applied inside store queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkFilter {
    /// Restrict to documents of these source types (empty = all)
    #[serde(default)]
    pub source_types: Vec<SourceType>,

    /// Restrict to these documents (empty = all)
    #[serde(default)]
    pub document_ids: Vec<Uuid>,
}

impl ChunkFilter {
    pub fn is_empty(&self) -> bool {
        self.source_types.is_empty() && self.document_ids.is_empty()
    }
}

/// Principal-scoped corpus counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentCounts {
    pub documents: usize,
    pub chunks: usize,
    pub distinct_sources: usize,
}

/// Storage backend for documents, chunks, and both search indexes.
///
/// Every query-returning method takes the caller's compiled access predicate
/// and applies it at the document level inside the query, so inaccessible
/// rows never leave the store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create tables and indexes; record the vector dimension.
    async fn initialize(&self) -> Result<()>;

    /// Vector dimension this store enforces on every chunk write.
    fn vector_dimension(&self) -> usize;

    /// Insert a document and its chunks atomically. Nothing persists if any
    /// part of the write fails.
    async fn insert_document_with_chunks(&self, document: &Document, chunks: &[Chunk])
        -> Result<()>;

    /// Look up a document by its dedupe identity.
    async fn find_by_source_key(
        &self,
        owner_id: &str,
        source_type: SourceType,
        source_key: &str,
    ) -> Result<Option<Document>>;

    /// Fetch a document by id, without access filtering (callers enforce
    /// write access themselves).
    async fn get_document(&self, id: Uuid) -> Result<Option<Document>>;

    /// Delete a document and all its chunks. Returns false when absent.
    async fn delete_document(&self, id: Uuid) -> Result<bool>;

    /// All chunks of a document ordered by index.
    async fn chunks_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>>;

    /// Top-k chunks by cosine similarity against the query vector.
    async fn semantic_search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        filter: &ChunkFilter,
        predicate: &AccessPredicate,
    ) -> Result<Vec<SearchResult>>;

    /// Top-k chunks by lexical relevance against the query text.
    async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        filter: &ChunkFilter,
        predicate: &AccessPredicate,
    ) -> Result<Vec<SearchResult>>;

    /// Principal-scoped counts of documents, chunks, and distinct sources.
    async fn document_counts(&self, predicate: &AccessPredicate) -> Result<DocumentCounts>;
}
