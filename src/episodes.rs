//! Temporal episode sink: time-anchored records of ingested documents

use crate::config::EpisodeConfig;
use crate::error::{EpisodeError, Result};
use crate::ingest::{Chapter, EpisodeKind};
use crate::store::SourceType;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

/// Everything the sink needs to know about a freshly ingested document.
///
/// The sink never reads from the store; this value is its whole world.
#[derive(Debug, Clone)]
pub struct DocumentLocator {
    pub document_id: Uuid,
    pub title: String,
    pub source: String,
    pub source_type: SourceType,
    pub source_key: String,
    pub reference_time: Option<DateTime<Utc>>,
    pub chapters: Vec<Chapter>,
    /// Chunk contents in document order
    pub chunk_contents: Vec<String>,
}

/// One episode to be recorded by the sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeRecord {
    /// Stable idempotency key; repeated emits coalesce
    pub key: String,
    pub document_id: Uuid,
    pub description: String,
    pub excerpt: String,
    pub source: String,
    pub source_type: SourceType,
    /// Anchor time of the episode, when known
    pub occurred_at: Option<DateTime<Utc>>,
    /// Ask the sink to derive structured facts from the excerpt
    pub extract_facts: bool,
}

/// Adapter that records reference-timed episodes for ingested documents
#[async_trait]
pub trait EpisodeSink: Send + Sync {
    /// Record (or replace) the episode stored under its key.
    async fn record(&self, episode: &EpisodeRecord) -> Result<()>;
}

/// Build the episode records for a document: one overview, plus one per
/// chapter when requested.
pub fn build_episodes(
    locator: &DocumentLocator,
    kind: EpisodeKind,
    extract_facts: bool,
    excerpt_max_chars: usize,
) -> Vec<EpisodeRecord> {
    let mut episodes = Vec::new();

    let body = locator.chunk_contents.join("\n");
    episodes.push(EpisodeRecord {
        key: format!("{}:{}:overview", locator.source_type, locator.source_key),
        document_id: locator.document_id,
        description: format!("Overview of {}", locator.title),
        excerpt: truncate_chars(&body, excerpt_max_chars),
        source: locator.source.clone(),
        source_type: locator.source_type,
        occurred_at: locator.reference_time,
        extract_facts,
    });

    if matches!(kind, EpisodeKind::Chapter | EpisodeKind::Both) {
        for chapter in &locator.chapters {
            let occurred_at = match (locator.reference_time, chapter.start_time) {
                (Some(reference), Some(offset)) => {
                    Some(reference + Duration::milliseconds((offset * 1000.0) as i64))
                }
                (Some(reference), None) => Some(reference),
                _ => None,
            };
            episodes.push(EpisodeRecord {
                key: format!(
                    "{}:{}:chapter:{}",
                    locator.source_type,
                    locator.source_key,
                    truncate_chars(&chapter.title, 30)
                ),
                document_id: locator.document_id,
                description: format!("Chapter \"{}\" of {}", chapter.title, locator.title),
                excerpt: truncate_chars(&chapter.content, excerpt_max_chars),
                source: locator.source.clone(),
                source_type: locator.source_type,
                occurred_at,
                extract_facts,
            });
        }
    }

    episodes
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

/// HTTP sink posting episodes to a graph service, keyed for idempotence
pub struct HttpEpisodeSink {
    client: reqwest::Client,
    config: EpisodeConfig,
}

impl HttpEpisodeSink {
    pub fn new(config: EpisodeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    fn episode_url(&self, key: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
        format!(
            "{}/episodes/{}",
            self.config.endpoint.trim_end_matches('/'),
            encoded
        )
    }
}

#[async_trait]
impl EpisodeSink for HttpEpisodeSink {
    async fn record(&self, episode: &EpisodeRecord) -> Result<()> {
        let url = self.episode_url(&episode.key);
        debug!(key = %episode.key, "Recording episode");

        let response = timeout(
            std::time::Duration::from_secs(self.config.timeout_secs),
            self.client.put(&url).json(episode).send(),
        )
        .await
        .map_err(|_| EpisodeError::Timeout)?
        .map_err(|e| EpisodeError::SinkUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reason = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(key = %episode.key, %status, "Episode sink rejected episode");
            return Err(EpisodeError::Rejected {
                key: episode.key.clone(),
                reason,
            }
            .into());
        }

        Ok(())
    }
}

/// In-memory sink coalescing episodes by key; used in tests and local runs
#[derive(Default)]
pub struct MemoryEpisodeSink {
    episodes: Mutex<HashMap<String, EpisodeRecord>>,
}

impl MemoryEpisodeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn episode(&self, key: &str) -> Option<EpisodeRecord> {
        self.episodes.lock().ok()?.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.episodes
            .lock()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.episodes.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EpisodeSink for MemoryEpisodeSink {
    async fn record(&self, episode: &EpisodeRecord) -> Result<()> {
        if let Ok(mut episodes) = self.episodes.lock() {
            episodes.insert(episode.key.clone(), episode.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_locator() -> DocumentLocator {
        DocumentLocator {
            document_id: Uuid::new_v4(),
            title: "Intro to Sorting".to_string(),
            source: "https://youtube.com/watch?v=abc123def45".to_string(),
            source_type: SourceType::Youtube,
            source_key: "abc123def45".to_string(),
            reference_time: Some("2024-03-01T12:00:00Z".parse().unwrap()),
            chapters: vec![
                Chapter {
                    title: "Bubble sort".to_string(),
                    start_time: Some(30.0),
                    end_time: Some(90.0),
                    content: "Bubble sort compares adjacent items.".to_string(),
                },
                Chapter {
                    title: "Quick sort".to_string(),
                    start_time: Some(90.0),
                    end_time: None,
                    content: "Quick sort partitions around a pivot.".to_string(),
                },
            ],
            chunk_contents: vec!["part one".to_string(), "part two".to_string()],
        }
    }

    #[test]
    fn test_overview_episode_key_and_anchor() {
        let locator = test_locator();
        let episodes = build_episodes(&locator, EpisodeKind::Overview, false, 100);

        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].key, "youtube:abc123def45:overview");
        assert_eq!(episodes[0].occurred_at, locator.reference_time);
        assert!(episodes[0].excerpt.contains("part one"));
    }

    #[test]
    fn test_chapter_episodes_anchored_at_offsets() {
        let locator = test_locator();
        let episodes = build_episodes(&locator, EpisodeKind::Both, false, 100);

        assert_eq!(episodes.len(), 3);
        assert_eq!(episodes[1].key, "youtube:abc123def45:chapter:Bubble sort");
        let expected: DateTime<Utc> = "2024-03-01T12:00:30Z".parse().unwrap();
        assert_eq!(episodes[1].occurred_at, Some(expected));
        assert_eq!(episodes[2].key, "youtube:abc123def45:chapter:Quick sort");
    }

    #[test]
    fn test_excerpt_truncation() {
        let mut locator = test_locator();
        locator.chunk_contents = vec!["x".repeat(500)];
        let episodes = build_episodes(&locator, EpisodeKind::Overview, false, 100);
        assert_eq!(episodes[0].excerpt.chars().count(), 100);
    }

    #[test]
    fn test_long_chapter_title_truncated_in_key() {
        let mut locator = test_locator();
        locator.chapters = vec![Chapter {
            title: "A very long chapter title that keeps going and going".to_string(),
            start_time: None,
            end_time: None,
            content: "text".to_string(),
        }];
        let episodes = build_episodes(&locator, EpisodeKind::Chapter, false, 100);
        let key = &episodes[1].key;
        assert!(key.starts_with("youtube:abc123def45:chapter:"));
        assert!(key.len() <= "youtube:abc123def45:chapter:".len() + 30);
    }

    #[test]
    fn test_extract_facts_flag_propagates() {
        let locator = test_locator();
        let episodes = build_episodes(&locator, EpisodeKind::Overview, true, 100);
        assert!(episodes[0].extract_facts);
    }

    #[tokio::test]
    async fn test_memory_sink_coalesces_by_key() {
        let sink = MemoryEpisodeSink::new();
        let locator = test_locator();
        let episodes = build_episodes(&locator, EpisodeKind::Overview, false, 100);

        sink.record(&episodes[0]).await.unwrap();
        sink.record(&episodes[0]).await.unwrap();

        assert_eq!(sink.len(), 1);
        let stored = sink.episode("youtube:abc123def45:overview").unwrap();
        assert_eq!(stored.document_id, locator.document_id);
    }

    #[test]
    fn test_http_sink_url_encoding() {
        let sink = HttpEpisodeSink::new(EpisodeConfig {
            enabled: true,
            endpoint: "http://localhost:8000/".to_string(),
            timeout_secs: 5,
            excerpt_max_chars: 100,
        });
        let url = sink.episode_url("youtube:abc:chapter:Intro & Setup");
        assert_eq!(
            url,
            "http://localhost:8000/episodes/youtube%3Aabc%3Achapter%3AIntro+%26+Setup"
        );
    }
}
