//! The ingestion pipeline: dedupe, chunk, embed, persist, emit episodes

use super::chunker::{ChunkPiece, ContentChunker, SplitBehavior};
use super::types::{IngestionResult, ScrapedContent};
use crate::config::{ChunkingConfig, EpisodeConfig, IngestionConfig};
use crate::embedding::Embedder;
use crate::episodes::{build_episodes, DocumentLocator, EpisodeSink};
use crate::error::{CoreError, Result};
use crate::store::{Chunk, Document, DocumentStore, Metadata, SourceType};
use chrono::Utc;
use futures::future::join_all;
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Serializes the dedupe-then-insert window per dedupe identity so two
/// concurrent ingests of the same source cannot both insert.
struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    async fn release(&self, key: &str) {
        let mut map = self.inner.lock().await;
        if let Some(lock) = map.get(key) {
            if Arc::strong_count(lock) == 1 {
                map.remove(key);
            }
        }
    }
}

/// Ingestion pipeline turning scraped content into persisted documents
pub struct IngestionPipeline {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    chunker: ContentChunker,
    sink: Option<Arc<dyn EpisodeSink>>,
    episode_config: EpisodeConfig,
    locks: KeyedLocks,
    batch_semaphore: Arc<Semaphore>,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkingConfig,
        ingestion: IngestionConfig,
        episode_config: EpisodeConfig,
        sink: Option<Arc<dyn EpisodeSink>>,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker: ContentChunker::new(chunking),
            sink,
            episode_config,
            locks: KeyedLocks::new(),
            batch_semaphore: Arc::new(Semaphore::new(ingestion.max_concurrent_ingestions.max(1))),
        }
    }

    /// Ingest one scraped unit: dedupe, chunk, embed, persist, and emit
    /// episodes. Embedding and persistence failures abort the call with
    /// nothing persisted; episode failures land in `result.errors`.
    pub async fn ingest(&self, scraped: ScrapedContent) -> Result<IngestionResult> {
        let started = Instant::now();

        if scraped.content.trim().is_empty() {
            return Err(CoreError::BadInput("content is empty".to_string()));
        }
        if scraped.source.trim().is_empty() {
            return Err(CoreError::BadInput("source is empty".to_string()));
        }

        // Refuse to ingest when the embedder cannot match the store
        if self.embedder.dimension() != self.store.vector_dimension() {
            return Err(CoreError::DimensionMismatch {
                expected: self.store.vector_dimension(),
                actual: self.embedder.dimension(),
            });
        }

        let content = normalize_content(&scraped.content);
        let source_key = canonical_source_key(&scraped.source, scraped.source_type);
        let title = if scraped.title.trim().is_empty() {
            derive_title(&scraped.source, &content)
        } else {
            scraped.title.trim().to_string()
        };

        let lock_key = format!(
            "{}:{}:{}",
            scraped.owner_id, scraped.source_type, source_key
        );
        let guard = self.locks.acquire(&lock_key).await;

        let result = self
            .ingest_locked(&scraped, content, source_key, title, started)
            .await;

        drop(guard);
        self.locks.release(&lock_key).await;

        result
    }

    async fn ingest_locked(
        &self,
        scraped: &ScrapedContent,
        content: String,
        source_key: String,
        title: String,
        started: Instant,
    ) -> Result<IngestionResult> {
        let options = &scraped.options;

        if let Some(existing) = self
            .store
            .find_by_source_key(&scraped.owner_id, scraped.source_type, &source_key)
            .await?
        {
            if options.force_reindex {
                info!(document_id = %existing.id, "Reindexing: deleting existing document");
                self.store.delete_document(existing.id).await?;
            } else if options.skip_duplicates {
                debug!(document_id = %existing.id, "Skipping duplicate source");
                return Ok(IngestionResult::skipped(
                    existing.id,
                    "document with the same source already exists",
                    started.elapsed().as_millis() as u64,
                ));
            }
            // Otherwise fall through and create another document
        }

        let behavior = SplitBehavior {
            structural: options.use_structural_parser,
            tag_code: options.extract_code_examples,
        };
        let pieces = if options.chunk_by_chapters && !scraped.chapters.is_empty() {
            self.chunker.chunk_chapters(&scraped.chapters, behavior)
        } else {
            self.chunker.chunk_content(&content, behavior)
        };

        if pieces.is_empty() {
            return Ok(IngestionResult {
                success: false,
                document_id: None,
                chunks_created: 0,
                processing_time_ms: started.elapsed().as_millis() as u64,
                errors: vec!["No chunks created".to_string()],
                skipped: false,
                skip_reason: None,
            });
        }

        let texts: Vec<String> = pieces.iter().map(|p| p.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let expected = self.store.vector_dimension();
        for embedding in &embeddings {
            if embedding.len() != expected {
                return Err(CoreError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }

        let document_metadata = merge_metadata(
            &scraped.metadata,
            build_provenance(&scraped.source, scraped.source_type, &content),
        );

        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4(),
            title: title.clone(),
            source: scraped.source.trim().to_string(),
            source_type: scraped.source_type,
            source_key: source_key.clone(),
            content,
            metadata: document_metadata.clone(),
            owner_id: scraped.owner_id.clone(),
            owner_email: scraped.owner_email.clone(),
            is_public: false,
            shared_with: vec![],
            group_ids: vec![],
            created_at: now,
            updated_at: now,
        };

        let chunks = build_chunks(&document, &pieces, embeddings, &document_metadata);

        self.store
            .insert_document_with_chunks(&document, &chunks)
            .await?;

        info!(
            document_id = %document.id,
            chunks = chunks.len(),
            source = %document.source,
            "Ingested document"
        );

        let mut errors = Vec::new();
        if options.create_temporal_episode {
            if let Some(sink) = &self.sink {
                let locator = DocumentLocator {
                    document_id: document.id,
                    title,
                    source: document.source.clone(),
                    source_type: document.source_type,
                    source_key,
                    reference_time: scraped.reference_time,
                    chapters: scraped.chapters.clone(),
                    chunk_contents: chunks.iter().map(|c| c.content.clone()).collect(),
                };
                for episode in build_episodes(
                    &locator,
                    options.episode_kind,
                    options.extract_facts,
                    self.episode_config.excerpt_max_chars,
                ) {
                    if let Err(e) = sink.record(&episode).await {
                        warn!(key = %episode.key, "Episode emission failed: {}", e);
                        errors.push(format!("episode {}: {}", episode.key, e));
                    }
                }
            }
        }

        Ok(IngestionResult {
            success: true,
            document_id: Some(document.id),
            chunks_created: chunks.len(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            errors,
            skipped: false,
            skip_reason: None,
        })
    }

    /// Bulk import with bounded concurrency. Individual failures become
    /// failed results; the batch itself never aborts.
    pub async fn ingest_batch(&self, items: Vec<ScrapedContent>) -> Vec<IngestionResult> {
        info!(items = items.len(), "Starting batch ingestion");

        let futures = items.into_iter().map(|item| {
            let semaphore = Arc::clone(&self.batch_semaphore);
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return IngestionResult {
                            success: false,
                            document_id: None,
                            chunks_created: 0,
                            processing_time_ms: 0,
                            errors: vec!["ingestion cancelled".to_string()],
                            skipped: false,
                            skip_reason: None,
                        }
                    }
                };
                let source = item.source.clone();
                match self.ingest(item).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(source = %source, "Batch item failed: {}", e);
                        IngestionResult {
                            success: false,
                            document_id: None,
                            chunks_created: 0,
                            processing_time_ms: 0,
                            errors: vec![e.to_string()],
                            skipped: false,
                            skip_reason: None,
                        }
                    }
                }
            }
        });

        join_all(futures).await
    }
}

fn build_chunks(
    document: &Document,
    pieces: &[ChunkPiece],
    embeddings: Vec<Vec<f32>>,
    document_metadata: &Metadata,
) -> Vec<Chunk> {
    let now = Utc::now();
    pieces
        .iter()
        .zip(embeddings)
        .map(|(piece, embedding)| {
            let mut metadata = document_metadata.clone();
            for (key, value) in &piece.metadata {
                metadata.insert(key.clone(), value.clone());
            }
            Chunk {
                id: Uuid::new_v4(),
                document_id: document.id,
                index: piece.index,
                content: piece.content.clone(),
                token_count: piece.token_count,
                start_char: piece.start_char,
                end_char: piece.end_char,
                metadata,
                embedding,
                created_at: now,
            }
        })
        .collect()
}

/// Canonicalize line endings and strip outer whitespace.
fn normalize_content(content: &str) -> String {
    content.replace("\r\n", "\n").trim().to_string()
}

/// Derive the dedupe key from a source reference. Video URLs collapse to the
/// video id so URL variants collide intentionally; web URLs are normalized;
/// everything else keys on the raw source.
pub fn canonical_source_key(source: &str, source_type: SourceType) -> String {
    let source = source.trim();
    match source_type {
        SourceType::Youtube => {
            extract_video_id(source).unwrap_or_else(|| source.to_string())
        }
        SourceType::Web => canonical_url(source).unwrap_or_else(|| source.to_string()),
        _ => source.to_string(),
    }
}

fn extract_video_id(source: &str) -> Option<String> {
    static VIDEO_ID: OnceLock<Regex> = OnceLock::new();
    let pattern = VIDEO_ID.get_or_init(|| {
        Regex::new(
            r"(?:youtube\.com/watch\?[^#]*v=|youtu\.be/|youtube\.com/embed/|youtube\.com/shorts/)([A-Za-z0-9_-]{11})",
        )
        .expect("valid video id pattern")
    });
    pattern
        .captures(source)
        .map(|captures| captures[1].to_string())
}

fn canonical_url(source: &str) -> Option<String> {
    let url = Url::parse(source).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();

    let mut canonical = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        canonical.push_str(&format!(":{}", port));
    }
    let path = url.path().trim_end_matches('/');
    canonical.push_str(path);
    if let Some(query) = url.query() {
        canonical.push('?');
        canonical.push_str(query);
    }
    Some(canonical)
}

/// Title fallback: first markdown heading, else the last URL path segment,
/// else the host, else the raw source.
fn derive_title(source: &str, content: &str) -> String {
    for line in content.lines().take(10) {
        let line = line.trim();
        if let Some(heading) = line.strip_prefix("# ") {
            return heading.trim().to_string();
        }
    }

    if let Ok(url) = Url::parse(source) {
        let segments: Vec<&str> = url.path().split('/').filter(|s| !s.is_empty()).collect();
        if let Some(last) = segments.last() {
            return last.replace(['-', '_'], " ");
        }
        if let Some(host) = url.host_str() {
            return host.to_string();
        }
    }

    source.to_string()
}

/// Provenance fields recorded on every ingested document.
fn build_provenance(source: &str, source_type: SourceType, content: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("source_type".to_string(), json!(source_type.as_str()));
    metadata.insert("content_chars".to_string(), json!(content.len()));
    metadata.insert("line_count".to_string(), json!(content.lines().count()));
    metadata.insert(
        "word_count".to_string(),
        json!(content.split_whitespace().count()),
    );
    metadata.insert(
        "ingested_at".to_string(),
        json!(Utc::now().to_rfc3339()),
    );

    if let Ok(url) = Url::parse(source) {
        if let Some(host) = url.host_str() {
            metadata.insert("domain".to_string(), json!(host));
            metadata.insert("path".to_string(), json!(url.path()));
        }
    }

    metadata
}

/// Caller metadata wins over generated provenance on key collisions.
fn merge_metadata(caller: &Metadata, mut provenance: Metadata) -> Metadata {
    for (key, value) in caller {
        provenance.insert(key.clone(), value.clone());
    }
    provenance
}
