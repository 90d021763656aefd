//! Ingestion: normalization, chunking, embedding, and persistence

pub mod chunker;
pub mod pipeline;
pub mod types;

pub use chunker::{ChunkPiece, ContentChunker, SplitBehavior};
pub use pipeline::{canonical_source_key, IngestionPipeline};
pub use types::{Chapter, EpisodeKind, IngestOptions, IngestionResult, ScrapedContent};
