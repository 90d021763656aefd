//! Type definitions for the ingestion pipeline

use crate::store::{Metadata, SourceType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chapter marker supplied alongside scraped content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,

    /// Offset into the source in seconds
    #[serde(default)]
    pub start_time: Option<f64>,

    #[serde(default)]
    pub end_time: Option<f64>,

    /// Text covered by this chapter
    pub content: String,
}

/// Normalized scraped content handed to the ingestion pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedContent {
    pub content: String,

    #[serde(default)]
    pub title: String,

    pub source: String,

    pub source_type: SourceType,

    #[serde(default)]
    pub metadata: Metadata,

    /// Anchor time for temporal episodes (e.g. publish or upload time)
    #[serde(default)]
    pub reference_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub chapters: Vec<Chapter>,

    #[serde(default)]
    pub owner_id: String,

    #[serde(default)]
    pub owner_email: String,

    #[serde(default)]
    pub options: IngestOptions,
}

/// Which episodes the temporal sink should record for a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeKind {
    #[default]
    Overview,
    Chapter,
    Both,
}

/// Per-call ingestion options with defaulted fields
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IngestOptions {
    /// Use format-aware (markdown) boundary detection
    #[serde(default)]
    pub use_structural_parser: bool,

    /// Tag chunks containing fenced code blocks
    #[serde(default)]
    pub extract_code_examples: bool,

    /// Chunk along the supplied chapter list instead of the body algorithm
    #[serde(default)]
    pub chunk_by_chapters: bool,

    /// Emit a temporal episode after persisting
    #[serde(default)]
    pub create_temporal_episode: bool,

    /// Which episodes to record when emission is enabled
    #[serde(default)]
    pub episode_kind: EpisodeKind,

    /// Ask the sink to derive structured facts
    #[serde(default)]
    pub extract_facts: bool,

    /// Return the existing document instead of creating a duplicate
    #[serde(default)]
    pub skip_duplicates: bool,

    /// Delete any existing document for this source before ingesting
    #[serde(default)]
    pub force_reindex: bool,
}

/// Result of an ingestion call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionResult {
    pub success: bool,

    pub document_id: Option<Uuid>,

    pub chunks_created: usize,

    pub processing_time_ms: u64,

    /// Non-fatal errors collected along the way (episode sink, etc.)
    #[serde(default)]
    pub errors: Vec<String>,

    /// Set when an existing document was found and the call was skipped
    #[serde(default)]
    pub skipped: bool,

    #[serde(default)]
    pub skip_reason: Option<String>,
}

impl IngestionResult {
    pub fn skipped(document_id: Uuid, reason: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            success: true,
            document_id: Some(document_id),
            chunks_created: 0,
            processing_time_ms: elapsed_ms,
            errors: vec![],
            skipped: true,
            skip_reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default_off() {
        let options = IngestOptions::default();
        assert!(!options.skip_duplicates);
        assert!(!options.force_reindex);
        assert!(!options.create_temporal_episode);
        assert_eq!(options.episode_kind, EpisodeKind::Overview);
    }

    #[test]
    fn test_scraped_content_deserializes_with_defaults() {
        let raw = r#"{
            "content": "alpha beta",
            "source": "a://1",
            "source_type": "article",
            "owner_id": "u1"
        }"#;
        let scraped: ScrapedContent = serde_json::from_str(raw).unwrap();
        assert_eq!(scraped.title, "");
        assert!(scraped.chapters.is_empty());
        assert!(!scraped.options.skip_duplicates);
    }

    #[test]
    fn test_episode_kind_serde() {
        assert_eq!(
            serde_json::to_string(&EpisodeKind::Both).unwrap(),
            "\"both\""
        );
        let kind: EpisodeKind = serde_json::from_str("\"chapter\"").unwrap();
        assert_eq!(kind, EpisodeKind::Chapter);
    }
}
