//! SQLite-backed document store with brute-force vector search and FTS5
//! lexical search

use super::{
    Chunk, ChunkFilter, Document, DocumentCounts, DocumentStore, Metadata, SearchResult,
    SourceType,
};
use crate::access::{AccessClause, AccessPredicate};
use crate::config::{LexicalConfig, StoreConfig};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// SQLite implementation of [`DocumentStore`]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    dimension: usize,
    lexical: LexicalConfig,
}

impl SqliteDocumentStore {
    /// Open (or create) the database behind `config.database_url`.
    pub async fn connect(config: &StoreConfig, lexical: LexicalConfig) -> Result<Self> {
        let url = &config.database_url;

        // Ensure the directory for a file-backed database exists
        if let Some(db_path) = url.strip_prefix("sqlite:") {
            let db_path = db_path.split('?').next().unwrap_or(db_path);
            if db_path != ":memory:" && !db_path.is_empty() {
                if let Some(parent) = std::path::Path::new(db_path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            StoreError::StorageFailed(format!(
                                "Failed to create database directory: {}",
                                e
                            ))
                        })?;
                    }
                }
            }
        }

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::StorageFailed(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        // A pooled in-memory database would give each connection its own
        // empty database; pin it to a single connection.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            dimension: config.vector_dimension,
            lexical,
        })
    }

    /// The FTS5 tokenizer for the configured analyzer.
    fn tokenizer(&self) -> &'static str {
        match self.lexical.analyzer.as_str() {
            "unicode" => "unicode61",
            _ => "porter unicode61",
        }
    }

    /// The dimension recorded in the store, if any.
    pub async fn recorded_dimension(&self) -> Result<Option<usize>> {
        let row =
            sqlx::query("SELECT value FROM store_meta WHERE key = 'vector_dimension'")
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some(row) => {
                let value: String = row.get("value");
                let dim = value.parse::<usize>().map_err(|e| {
                    StoreError::StorageFailed(format!("Corrupt dimension record: {}", e))
                })?;
                Ok(Some(dim))
            }
            None => Ok(None),
        }
    }

    /// Calculate cosine similarity between two vectors, normalized to [0, 1]
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        let cosine = (dot_product / (norm_a * norm_b)) as f64;
        ((1.0 + cosine) / 2.0).clamp(0.0, 1.0)
    }

    /// Serialize embedding for storage
    pub fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding
            .iter()
            .flat_map(|f| f.to_le_bytes().to_vec())
            .collect()
    }

    /// Deserialize embedding from storage
    pub fn deserialize_embedding(data: &[u8]) -> Vec<f32> {
        data.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn serialize_metadata(metadata: &Metadata) -> Result<String> {
        Ok(serde_json::to_string(metadata)?)
    }

    fn deserialize_metadata(data: &str) -> Metadata {
        serde_json::from_str(data).unwrap_or_default()
    }

    fn serialize_string_list(values: &[String]) -> Result<String> {
        Ok(serde_json::to_string(values)?)
    }

    fn deserialize_string_list(data: &str) -> Vec<String> {
        serde_json::from_str(data).unwrap_or_default()
    }

    fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::StorageFailed(e.to_string()).into())
    }

    fn document_from_row(row: &SqliteRow) -> Result<Document> {
        let id: String = row.get("id");
        let source_type: String = row.get("source_type");
        let metadata: String = row.get("metadata");
        let shared_with: String = row.get("shared_with");
        let group_ids: String = row.get("group_ids");
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");

        Ok(Document {
            id: Uuid::parse_str(&id).map_err(|e| StoreError::StorageFailed(e.to_string()))?,
            title: row.get("title"),
            source: row.get("source"),
            source_type: source_type
                .parse::<SourceType>()
                .map_err(StoreError::StorageFailed)?,
            source_key: row.get("source_key"),
            content: row.get("content"),
            metadata: Self::deserialize_metadata(&metadata),
            owner_id: row.get("owner_id"),
            owner_email: row.get("owner_email"),
            is_public: row.get::<i64, _>("is_public") != 0,
            shared_with: Self::deserialize_string_list(&shared_with),
            group_ids: Self::deserialize_string_list(&group_ids),
            created_at: Self::parse_timestamp(&created_at)?,
            updated_at: Self::parse_timestamp(&updated_at)?,
        })
    }

    fn chunk_from_row(row: &SqliteRow) -> Result<Chunk> {
        let id: String = row.get("id");
        let document_id: String = row.get("document_id");
        let metadata: String = row.get("metadata");
        let embedding: Vec<u8> = row.get("embedding");
        let created_at: String = row.get("created_at");

        Ok(Chunk {
            id: Uuid::parse_str(&id).map_err(|e| StoreError::StorageFailed(e.to_string()))?,
            document_id: Uuid::parse_str(&document_id)
                .map_err(|e| StoreError::StorageFailed(e.to_string()))?,
            index: row.get::<i64, _>("chunk_index") as usize,
            content: row.get("content"),
            token_count: row.get::<i64, _>("token_count") as usize,
            start_char: row.get::<i64, _>("start_char") as usize,
            end_char: row.get::<i64, _>("end_char") as usize,
            metadata: Self::deserialize_metadata(&metadata),
            embedding: Self::deserialize_embedding(&embedding),
            created_at: Self::parse_timestamp(&created_at)?,
        })
    }

    /// Translate the compiled access predicate into a WHERE fragment over
    /// the joined documents table (aliased `d`), with positional binds.
    fn predicate_sql(predicate: &AccessPredicate) -> (String, Vec<String>) {
        match predicate {
            AccessPredicate::All => ("1".to_string(), vec![]),
            AccessPredicate::AnyOf(clauses) => {
                if clauses.is_empty() {
                    return ("0".to_string(), vec![]);
                }
                let mut parts = Vec::with_capacity(clauses.len());
                let mut binds = Vec::new();
                for clause in clauses {
                    match clause {
                        AccessClause::OwnerId(id) => {
                            parts.push("d.owner_id = ?".to_string());
                            binds.push(id.clone());
                        }
                        AccessClause::OwnerEmail(email) => {
                            parts.push("d.owner_email = ?".to_string());
                            binds.push(email.clone());
                        }
                        AccessClause::Public => {
                            parts.push("d.is_public = 1".to_string());
                        }
                        AccessClause::SharedWith(id) => {
                            parts.push(
                                "EXISTS (SELECT 1 FROM json_each(d.shared_with) \
                                 WHERE json_each.value = ?)"
                                    .to_string(),
                            );
                            binds.push(id.clone());
                        }
                        AccessClause::GroupIn(groups) => {
                            let placeholders =
                                vec!["?"; groups.len()].join(", ");
                            parts.push(format!(
                                "EXISTS (SELECT 1 FROM json_each(d.group_ids) \
                                 WHERE json_each.value IN ({}))",
                                placeholders
                            ));
                            binds.extend(groups.iter().cloned());
                        }
                    }
                }
                (format!("({})", parts.join(" OR ")), binds)
            }
        }
    }

    /// Translate the chunk-level filter into a WHERE fragment.
    fn filter_sql(filter: &ChunkFilter) -> (String, Vec<String>) {
        let mut parts = Vec::new();
        let mut binds = Vec::new();

        if !filter.source_types.is_empty() {
            let placeholders = vec!["?"; filter.source_types.len()].join(", ");
            parts.push(format!("d.source_type IN ({})", placeholders));
            binds.extend(filter.source_types.iter().map(|st| st.as_str().to_string()));
        }

        if !filter.document_ids.is_empty() {
            let placeholders = vec!["?"; filter.document_ids.len()].join(", ");
            parts.push(format!("c.document_id IN ({})", placeholders));
            binds.extend(filter.document_ids.iter().map(|id| id.to_string()));
        }

        if parts.is_empty() {
            ("1".to_string(), binds)
        } else {
            (parts.join(" AND "), binds)
        }
    }

    /// Build the FTS5 match expression for a user query. Terms are quoted to
    /// neutralize operator syntax; prefix expansion approximates fuzzy
    /// matching when enabled.
    fn build_match_expression(&self, query: &str) -> Option<String> {
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| {
                if self.lexical.fuzzy && t.len() >= self.lexical.fuzzy_prefix_length {
                    format!("\"{}\" *", t)
                } else {
                    format!("\"{}\"", t)
                }
            })
            .collect();

        if terms.is_empty() {
            None
        } else {
            Some(terms.join(" OR "))
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn initialize(&self) -> Result<()> {
        info!("Initializing document store");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                source TEXT NOT NULL,
                source_type TEXT NOT NULL,
                source_key TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                owner_id TEXT NOT NULL DEFAULT '',
                owner_email TEXT NOT NULL DEFAULT '',
                is_public INTEGER NOT NULL DEFAULT 0,
                shared_with TEXT NOT NULL DEFAULT '[]',
                group_ids TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id),
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                token_count INTEGER NOT NULL,
                start_char INTEGER NOT NULL,
                end_char INTEGER NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(document_id, chunk_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_source_key \
             ON documents(owner_id, source_type, source_key)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_public ON documents(is_public)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(\
             content, content='chunks', content_rowid='rowid', tokenize='{}')",
            self.tokenizer()
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS chunks_fts_insert AFTER INSERT ON chunks BEGIN
                INSERT INTO chunks_fts(rowid, content) VALUES (new.rowid, new.content);
            END
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS chunks_fts_delete AFTER DELETE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, content)
                VALUES ('delete', old.rowid, old.content);
            END
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS store_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        )
        .execute(&self.pool)
        .await?;

        match self.recorded_dimension().await? {
            Some(recorded) if recorded != self.dimension => {
                return Err(StoreError::InvalidDimension {
                    expected: recorded,
                    actual: self.dimension,
                }
                .into());
            }
            Some(_) => {}
            None => {
                sqlx::query(
                    "INSERT INTO store_meta (key, value) VALUES ('vector_dimension', ?)",
                )
                .bind(self.dimension.to_string())
                .execute(&self.pool)
                .await?;
            }
        }

        info!(dimension = self.dimension, "Document store initialized");
        Ok(())
    }

    fn vector_dimension(&self) -> usize {
        self.dimension
    }

    async fn insert_document_with_chunks(
        &self,
        document: &Document,
        chunks: &[Chunk],
    ) -> Result<()> {
        for chunk in chunks {
            if chunk.embedding.len() != self.dimension {
                return Err(StoreError::InvalidDimension {
                    expected: self.dimension,
                    actual: chunk.embedding.len(),
                }
                .into());
            }
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents
                (id, title, source, source_type, source_key, content, metadata,
                 owner_id, owner_email, is_public, shared_with, group_ids,
                 created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(document.id.to_string())
        .bind(&document.title)
        .bind(&document.source)
        .bind(document.source_type.as_str())
        .bind(&document.source_key)
        .bind(&document.content)
        .bind(Self::serialize_metadata(&document.metadata)?)
        .bind(&document.owner_id)
        .bind(&document.owner_email)
        .bind(document.is_public as i64)
        .bind(Self::serialize_string_list(&document.shared_with)?)
        .bind(Self::serialize_string_list(&document.group_ids)?)
        .bind(document.created_at.to_rfc3339())
        .bind(document.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks
                    (id, document_id, chunk_index, content, token_count,
                     start_char, end_char, metadata, embedding, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(chunk.id.to_string())
            .bind(chunk.document_id.to_string())
            .bind(chunk.index as i64)
            .bind(&chunk.content)
            .bind(chunk.token_count as i64)
            .bind(chunk.start_char as i64)
            .bind(chunk.end_char as i64)
            .bind(Self::serialize_metadata(&chunk.metadata)?)
            .bind(Self::serialize_embedding(&chunk.embedding))
            .bind(chunk.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            document_id = %document.id,
            chunks = chunks.len(),
            "Persisted document with chunks"
        );
        Ok(())
    }

    async fn find_by_source_key(
        &self,
        owner_id: &str,
        source_type: SourceType,
        source_key: &str,
    ) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT * FROM documents \
             WHERE owner_id = ?1 AND source_type = ?2 AND source_key = ?3 \
             ORDER BY created_at LIMIT 1",
        )
        .bind(owner_id)
        .bind(source_type.as_str())
        .bind(source_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::document_from_row).transpose()
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::document_from_row).transpose()
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn chunks_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT * FROM chunks WHERE document_id = ?1 ORDER BY chunk_index",
        )
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::chunk_from_row).collect()
    }

    async fn semantic_search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        filter: &ChunkFilter,
        predicate: &AccessPredicate,
    ) -> Result<Vec<SearchResult>> {
        if query_embedding.len() != self.dimension {
            return Err(StoreError::InvalidDimension {
                expected: self.dimension,
                actual: query_embedding.len(),
            }
            .into());
        }

        let (access_sql, access_binds) = Self::predicate_sql(predicate);
        let (filter_sql, filter_binds) = Self::filter_sql(filter);

        let sql = format!(
            "SELECT c.id, c.document_id, c.chunk_index, c.content, c.token_count, \
             c.start_char, c.end_char, c.metadata, c.embedding, c.created_at, \
             d.title AS document_title, d.source AS document_source \
             FROM chunks c JOIN documents d ON d.id = c.document_id \
             WHERE {} AND {}",
            access_sql, filter_sql
        );

        let mut query = sqlx::query(&sql);
        for bind in access_binds.iter().chain(filter_binds.iter()) {
            query = query.bind(bind);
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let embedding: Vec<u8> = row.get("embedding");
            let embedding = Self::deserialize_embedding(&embedding);
            let similarity = Self::cosine_similarity(query_embedding, &embedding);

            let chunk_id: String = row.get("id");
            let document_id: String = row.get("document_id");
            let metadata: String = row.get("metadata");

            results.push(SearchResult {
                chunk_id: Uuid::parse_str(&chunk_id)
                    .map_err(|e| StoreError::StorageFailed(e.to_string()))?,
                document_id: Uuid::parse_str(&document_id)
                    .map_err(|e| StoreError::StorageFailed(e.to_string()))?,
                content: row.get("content"),
                similarity,
                metadata: Self::deserialize_metadata(&metadata),
                document_title: row.get("document_title"),
                document_source: row.get("document_source"),
            });
        }

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);

        debug!(results = results.len(), "Semantic search completed");
        Ok(results)
    }

    async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        filter: &ChunkFilter,
        predicate: &AccessPredicate,
    ) -> Result<Vec<SearchResult>> {
        let Some(match_expr) = self.build_match_expression(query) else {
            return Ok(vec![]);
        };

        let (access_sql, access_binds) = Self::predicate_sql(predicate);
        let (filter_sql, filter_binds) = Self::filter_sql(filter);

        let sql = format!(
            "SELECT c.id, c.document_id, c.content, c.metadata, \
             d.title AS document_title, d.source AS document_source, \
             bm25(chunks_fts) AS rank \
             FROM chunks_fts \
             JOIN chunks c ON c.rowid = chunks_fts.rowid \
             JOIN documents d ON d.id = c.document_id \
             WHERE chunks_fts MATCH ? AND {} AND {} \
             ORDER BY rank LIMIT ?",
            access_sql, filter_sql
        );

        let mut query_builder = sqlx::query(&sql).bind(match_expr);
        for bind in access_binds.iter().chain(filter_binds.iter()) {
            query_builder = query_builder.bind(bind);
        }
        query_builder = query_builder.bind(limit as i64);

        let rows = query_builder
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::SearchFailed(e.to_string()))?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk_id: String = row.get("id");
            let document_id: String = row.get("document_id");
            let metadata: String = row.get("metadata");
            let rank: f64 = row.get("rank");

            results.push(SearchResult {
                chunk_id: Uuid::parse_str(&chunk_id)
                    .map_err(|e| StoreError::StorageFailed(e.to_string()))?,
                document_id: Uuid::parse_str(&document_id)
                    .map_err(|e| StoreError::StorageFailed(e.to_string()))?,
                content: row.get("content"),
                // FTS5 bm25() returns more-negative-is-better; flip the sign
                // so the score grows with relevance
                similarity: -rank,
                metadata: Self::deserialize_metadata(&metadata),
                document_title: row.get("document_title"),
                document_source: row.get("document_source"),
            });
        }

        debug!(results = results.len(), "Lexical search completed");
        Ok(results)
    }

    async fn document_counts(&self, predicate: &AccessPredicate) -> Result<DocumentCounts> {
        let (access_sql, access_binds) = Self::predicate_sql(predicate);

        let sql = format!(
            "SELECT COUNT(*) AS documents, COUNT(DISTINCT d.source) AS sources \
             FROM documents d WHERE {}",
            access_sql
        );
        let mut query = sqlx::query(&sql);
        for bind in &access_binds {
            query = query.bind(bind);
        }
        let row = query.fetch_one(&self.pool).await?;
        let documents: i64 = row.get("documents");
        let sources: i64 = row.get("sources");

        let sql = format!(
            "SELECT COUNT(*) AS chunks FROM chunks c \
             JOIN documents d ON d.id = c.document_id WHERE {}",
            access_sql
        );
        let mut query = sqlx::query(&sql);
        for bind in &access_binds {
            query = query.bind(bind);
        }
        let row = query.fetch_one(&self.pool).await?;
        let chunks: i64 = row.get("chunks");

        Ok(DocumentCounts {
            documents: documents as usize,
            chunks: chunks as usize,
            distinct_sources: sources as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Principal;

    fn test_document(owner: &str, source: &str, public: bool) -> Document {
        let now = Utc::now();
        Document {
            id: Uuid::new_v4(),
            title: format!("Doc {}", source),
            source: source.to_string(),
            source_type: SourceType::Article,
            source_key: source.to_string(),
            content: "alpha beta gamma".to_string(),
            metadata: Metadata::new(),
            owner_id: owner.to_string(),
            owner_email: format!("{}@example.com", owner),
            is_public: public,
            shared_with: vec![],
            group_ids: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn test_chunk(document_id: Uuid, index: usize, content: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id,
            index,
            content: content.to_string(),
            token_count: content.split_whitespace().count(),
            start_char: 0,
            end_char: content.len(),
            metadata: Metadata::new(),
            embedding,
            created_at: Utc::now(),
        }
    }

    async fn create_test_store() -> SqliteDocumentStore {
        let config = StoreConfig {
            database_url: "sqlite::memory:".to_string(),
            vector_dimension: 4,
        };
        let store = SqliteDocumentStore::connect(&config, LexicalConfig::default())
            .await
            .unwrap();
        store.initialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_insert_and_fetch_document() {
        let store = create_test_store().await;

        let doc = test_document("u1", "a://1", false);
        let chunks = vec![
            test_chunk(doc.id, 0, "alpha beta", vec![1.0, 0.0, 0.0, 0.0]),
            test_chunk(doc.id, 1, "beta gamma", vec![0.0, 1.0, 0.0, 0.0]),
        ];

        store.insert_document_with_chunks(&doc, &chunks).await.unwrap();

        let fetched = store.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, doc.title);
        assert_eq!(fetched.owner_id, "u1");

        let stored_chunks = store.chunks_for_document(doc.id).await.unwrap();
        assert_eq!(stored_chunks.len(), 2);
        assert_eq!(stored_chunks[0].index, 0);
        assert_eq!(stored_chunks[1].index, 1);
        assert_eq!(stored_chunks[0].embedding, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_dimension_enforced_on_insert() {
        let store = create_test_store().await;

        let doc = test_document("u1", "a://1", false);
        let chunks = vec![test_chunk(doc.id, 0, "alpha", vec![1.0, 0.0])];

        let err = store
            .insert_document_with_chunks(&doc, &chunks)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DimensionMismatch);

        // Nothing was persisted
        assert!(store.get_document(doc.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_source_key() {
        let store = create_test_store().await;

        let doc = test_document("u1", "a://1", false);
        store.insert_document_with_chunks(&doc, &[]).await.unwrap();

        let found = store
            .find_by_source_key("u1", SourceType::Article, "a://1")
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, doc.id);

        let missing = store
            .find_by_source_key("u2", SourceType::Article, "a://1")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_delete_cascades_to_chunks() {
        let store = create_test_store().await;

        let doc = test_document("u1", "a://1", false);
        let chunks = vec![test_chunk(doc.id, 0, "alpha", vec![1.0, 0.0, 0.0, 0.0])];
        store.insert_document_with_chunks(&doc, &chunks).await.unwrap();

        assert!(store.delete_document(doc.id).await.unwrap());
        assert!(store.get_document(doc.id).await.unwrap().is_none());
        assert!(store.chunks_for_document(doc.id).await.unwrap().is_empty());

        // Lexical index no longer serves the deleted chunk
        let results = store
            .lexical_search("alpha", 10, &ChunkFilter::default(), &AccessPredicate::All)
            .await
            .unwrap();
        assert!(results.is_empty());

        assert!(!store.delete_document(doc.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_semantic_search_orders_by_similarity() {
        let store = create_test_store().await;

        let doc = test_document("u1", "a://1", true);
        let chunks = vec![
            test_chunk(doc.id, 0, "exact", vec![1.0, 0.0, 0.0, 0.0]),
            test_chunk(doc.id, 1, "close", vec![0.9, 0.1, 0.0, 0.0]),
            test_chunk(doc.id, 2, "far", vec![0.0, 0.0, 1.0, 0.0]),
        ];
        store.insert_document_with_chunks(&doc, &chunks).await.unwrap();

        let results = store
            .semantic_search(
                &[1.0, 0.0, 0.0, 0.0],
                2,
                &ChunkFilter::default(),
                &AccessPredicate::All,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "exact");
        assert_eq!(results[1].content, "close");
        assert!(results[0].similarity > results[1].similarity);
        assert!(results[0].similarity <= 1.0);
        assert_eq!(results[0].document_title, doc.title);
    }

    #[tokio::test]
    async fn test_lexical_search_matches_terms() {
        let store = create_test_store().await;

        let doc = test_document("u1", "a://1", true);
        let chunks = vec![
            test_chunk(doc.id, 0, "the quick brown fox", vec![1.0, 0.0, 0.0, 0.0]),
            test_chunk(doc.id, 1, "a lazy dog sleeps", vec![0.0, 1.0, 0.0, 0.0]),
        ];
        store.insert_document_with_chunks(&doc, &chunks).await.unwrap();

        let results = store
            .lexical_search("fox", 10, &ChunkFilter::default(), &AccessPredicate::All)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "the quick brown fox");

        let none = store
            .lexical_search("zebra", 10, &ChunkFilter::default(), &AccessPredicate::All)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_access_predicate_applied_in_queries() {
        let store = create_test_store().await;

        let private_doc = test_document("u1", "a://private", false);
        let public_doc = test_document("u1", "a://public", true);
        store
            .insert_document_with_chunks(
                &private_doc,
                &[test_chunk(private_doc.id, 0, "secret fox", vec![1.0, 0.0, 0.0, 0.0])],
            )
            .await
            .unwrap();
        store
            .insert_document_with_chunks(
                &public_doc,
                &[test_chunk(public_doc.id, 0, "open fox", vec![1.0, 0.0, 0.0, 0.0])],
            )
            .await
            .unwrap();

        let stranger = AccessPredicate::compile(&Principal::user("u2", "u2@example.com"));

        let semantic = store
            .semantic_search(&[1.0, 0.0, 0.0, 0.0], 10, &ChunkFilter::default(), &stranger)
            .await
            .unwrap();
        assert_eq!(semantic.len(), 1);
        assert_eq!(semantic[0].document_id, public_doc.id);

        let lexical = store
            .lexical_search("fox", 10, &ChunkFilter::default(), &stranger)
            .await
            .unwrap();
        assert_eq!(lexical.len(), 1);
        assert_eq!(lexical[0].document_id, public_doc.id);

        let owner = AccessPredicate::compile(&Principal::user("u1", "u1@example.com"));
        let all = store
            .lexical_search("fox", 10, &ChunkFilter::default(), &owner)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_chunk_filter_by_source_type() {
        let store = create_test_store().await;

        let mut web_doc = test_document("u1", "https://example.com", true);
        web_doc.source_type = SourceType::Web;
        let article_doc = test_document("u1", "a://article", true);

        store
            .insert_document_with_chunks(
                &web_doc,
                &[test_chunk(web_doc.id, 0, "shared term", vec![1.0, 0.0, 0.0, 0.0])],
            )
            .await
            .unwrap();
        store
            .insert_document_with_chunks(
                &article_doc,
                &[test_chunk(article_doc.id, 0, "shared term", vec![1.0, 0.0, 0.0, 0.0])],
            )
            .await
            .unwrap();

        let filter = ChunkFilter {
            source_types: vec![SourceType::Web],
            document_ids: vec![],
        };
        let results = store
            .lexical_search("shared", 10, &filter, &AccessPredicate::All)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, web_doc.id);
    }

    #[tokio::test]
    async fn test_document_counts_scoped_by_principal() {
        let store = create_test_store().await;

        let mine = test_document("u1", "a://mine", false);
        let theirs = test_document("u2", "a://theirs", false);
        let public = test_document("u3", "a://pub", true);

        for (doc, n) in [(&mine, 2usize), (&theirs, 1), (&public, 1)] {
            let chunks: Vec<Chunk> = (0..n)
                .map(|i| test_chunk(doc.id, i, "text", vec![0.5, 0.5, 0.0, 0.0]))
                .collect();
            store.insert_document_with_chunks(doc, &chunks).await.unwrap();
        }

        let u1 = AccessPredicate::compile(&Principal::user("u1", "u1@example.com"));
        let counts = store.document_counts(&u1).await.unwrap();
        assert_eq!(counts.documents, 2); // own + public
        assert_eq!(counts.chunks, 3);
        assert_eq!(counts.distinct_sources, 2);

        let admin = store.document_counts(&AccessPredicate::All).await.unwrap();
        assert_eq!(admin.documents, 3);
        assert_eq!(admin.chunks, 4);
    }

    #[tokio::test]
    async fn test_dimension_recorded_and_checked() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!(
            "sqlite:{}",
            dir.path().join("store.db").to_str().unwrap()
        );

        let config = StoreConfig {
            database_url: url.clone(),
            vector_dimension: 4,
        };
        let store = SqliteDocumentStore::connect(&config, LexicalConfig::default())
            .await
            .unwrap();
        store.initialize().await.unwrap();
        assert_eq!(store.recorded_dimension().await.unwrap(), Some(4));
        drop(store);

        // Reopening with a different dimension must fail initialization
        let config = StoreConfig {
            database_url: url,
            vector_dimension: 8,
        };
        let store = SqliteDocumentStore::connect(&config, LexicalConfig::default())
            .await
            .unwrap();
        let err = store.initialize().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DimensionMismatch);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];

        assert_eq!(SqliteDocumentStore::cosine_similarity(&a, &b), 1.0);
        assert_eq!(SqliteDocumentStore::cosine_similarity(&a, &c), 0.5);
        assert_eq!(SqliteDocumentStore::cosine_similarity(&a, &d), 0.0);
    }

    #[test]
    fn test_embedding_serialization() {
        let embedding = vec![1.5, -2.3, 0.0, 42.1];
        let serialized = SqliteDocumentStore::serialize_embedding(&embedding);
        let deserialized = SqliteDocumentStore::deserialize_embedding(&serialized);

        assert_eq!(embedding.len(), deserialized.len());
        for (orig, deser) in embedding.iter().zip(deserialized.iter()) {
            assert!((orig - deser).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_match_expression_quoting() {
        let config = StoreConfig {
            database_url: "sqlite::memory:".to_string(),
            vector_dimension: 4,
        };
        let lexical = LexicalConfig {
            analyzer: "porter".to_string(),
            fuzzy: true,
            fuzzy_prefix_length: 3,
        };
        // Construct without connecting; only the expression builder is under test
        let rt = tokio::runtime::Runtime::new().unwrap();
        let store = rt
            .block_on(SqliteDocumentStore::connect(&config, lexical))
            .unwrap();

        let expr = store.build_match_expression("fox AND \"dog\"").unwrap();
        // Operators and quotes are neutralized; long terms get prefix expansion
        assert_eq!(expr, "\"fox\" * OR \"AND\" * OR \"dog\" *");

        assert!(store.build_match_expression("  ~~ !! ").is_none());
    }
}
