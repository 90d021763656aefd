//! Embedding provider integration: HTTP client, retries, and caching

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Trait for text-to-vector conversion
#[async_trait]
pub trait Embedder: Send + Sync {
    /// The vector dimension this embedder produces
    fn dimension(&self) -> usize;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts; output order matches input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Bounded in-memory LRU cache keyed by text hash
struct EmbeddingCache {
    entries: HashMap<u64, (Vec<f32>, u64)>,
    max_entries: usize,
    clock: u64,
}

impl EmbeddingCache {
    fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
            clock: 0,
        }
    }

    fn key(model: &str, text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        model.hash(&mut hasher);
        text.hash(&mut hasher);
        hasher.finish()
    }

    fn get(&mut self, key: u64) -> Option<Vec<f32>> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(&key).map(|(vector, last_used)| {
            *last_used = clock;
            vector.clone()
        })
    }

    fn put(&mut self, key: u64, vector: Vec<f32>) {
        if self.max_entries == 0 {
            return;
        }
        self.clock += 1;
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (_, last_used))| *last_used)
                .map(|(k, _)| *k)
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, (vector, self.clock));
    }
}

/// HTTP embedder against an Ollama-style embeddings endpoint
pub struct OllamaEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
    cache: Option<Mutex<EmbeddingCache>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Embeddings API request
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    prompt: String,
}

/// Embeddings API response
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    /// Create a new embedder client
    pub fn new(config: EmbeddingConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        let cache = if config.cache.enabled {
            Some(Mutex::new(EmbeddingCache::new(config.cache.max_entries)))
        } else {
            None
        };

        Self {
            client,
            config,
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache hit/miss counters since process start
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn api_url(&self) -> String {
        format!(
            "{}/api/embeddings",
            self.config.endpoint.trim_end_matches('/')
        )
    }

    fn cache_get(&self, key: u64) -> Option<Vec<f32>> {
        let cache = self.cache.as_ref()?;
        let hit = cache.lock().ok()?.get(key);
        match &hit {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        hit
    }

    fn cache_put(&self, key: u64, vector: &[f32]) {
        if let Some(cache) = &self.cache {
            if let Ok(mut cache) = cache.lock() {
                cache.put(key, vector.to_vec());
            }
        }
    }

    /// Delay before the given retry attempt (1-based), exponential with jitter
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_base_delay_ms;
        let exp = base.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
        let capped = exp.min(self.config.retry_max_delay_ms);
        let jitter = if base > 1 {
            rand::rng().random_range(0..base / 2 + 1)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }

    /// One provider round-trip, no retries
    async fn request_embedding(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let request = EmbedRequest {
            model: self.config.model.clone(),
            prompt: text.to_string(),
        };

        let response = timeout(
            Duration::from_secs(self.config.timeout_secs),
            self.client.post(self.api_url()).json(&request).send(),
        )
        .await
        .map_err(|_| EmbeddingError::Timeout)?
        .map_err(|e| EmbeddingError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EmbeddingError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if parsed.embedding.len() != self.config.dimension {
            return Err(EmbeddingError::InvalidResponse(format!(
                "provider returned dimension {}, expected {}",
                parsed.embedding.len(),
                self.config.dimension
            )));
        }

        Ok(parsed.embedding)
    }

    /// Embed with the configured retry budget; transient failures back off,
    /// permanent ones propagate immediately
    async fn embed_with_retries(&self, text: &str) -> Result<Vec<f32>> {
        let mut last_error: Option<EmbeddingError> = None;

        for attempt in 0..self.config.retry_attempts {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying embed");
                tokio::time::sleep(delay).await;
            }

            match self.request_embedding(text).await {
                Ok(vector) => return Ok(vector),
                Err(e) if e.is_transient() => {
                    warn!("Embed attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(EmbeddingError::RetriesExhausted {
            attempts: self.config.retry_attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no error recorded".to_string()),
        }
        .into())
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = EmbeddingCache::key(&self.config.model, text);
        if let Some(vector) = self.cache_get(key) {
            debug!("Embedding cache hit");
            return Ok(vector);
        }

        let vector = self.embed_with_retries(text).await?;
        self.cache_put(key, &vector);
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let batch_size = self.config.batch_size.max(1);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_batches.max(1)));

        let batches: Vec<(usize, &[String])> =
            texts.chunks(batch_size).enumerate().collect();

        let futures = batches.into_iter().map(|(batch_index, batch)| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| crate::error::CoreError::Cancelled("embedder shut down".into()))?;
                let mut vectors = Vec::with_capacity(batch.len());
                for text in batch {
                    vectors.push(self.embed(text).await?);
                }
                Ok::<_, crate::error::CoreError>((batch_index, vectors))
            }
        });

        let mut indexed: Vec<(usize, Vec<Vec<f32>>)> = Vec::new();
        for result in join_all(futures).await {
            indexed.push(result?);
        }
        indexed.sort_by_key(|(batch_index, _)| *batch_index);

        Ok(indexed.into_iter().flat_map(|(_, v)| v).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingCacheConfig;

    fn test_config() -> EmbeddingConfig {
        EmbeddingConfig {
            endpoint: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 4,
            timeout_secs: 5,
            retry_attempts: 3,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 50,
            batch_size: 2,
            max_concurrent_batches: 2,
            cache: EmbeddingCacheConfig {
                enabled: true,
                max_entries: 4,
            },
        }
    }

    #[test]
    fn test_api_url() {
        let embedder = OllamaEmbedder::new(test_config());
        assert_eq!(embedder.api_url(), "http://localhost:11434/api/embeddings");

        let mut config = test_config();
        config.endpoint = "http://host:11434/".to_string();
        let embedder = OllamaEmbedder::new(config);
        assert_eq!(embedder.api_url(), "http://host:11434/api/embeddings");
    }

    #[test]
    fn test_cache_key_stability() {
        let a = EmbeddingCache::key("model-a", "hello");
        let b = EmbeddingCache::key("model-a", "hello");
        let c = EmbeddingCache::key("model-b", "hello");
        let d = EmbeddingCache::key("model-a", "world");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_cache_eviction_keeps_recent() {
        let mut cache = EmbeddingCache::new(2);
        let k1 = EmbeddingCache::key("m", "one");
        let k2 = EmbeddingCache::key("m", "two");
        let k3 = EmbeddingCache::key("m", "three");

        cache.put(k1, vec![1.0]);
        cache.put(k2, vec![2.0]);

        // Touch k1 so k2 becomes the eviction candidate
        assert!(cache.get(k1).is_some());
        cache.put(k3, vec![3.0]);

        assert!(cache.get(k1).is_some());
        assert!(cache.get(k2).is_none());
        assert!(cache.get(k3).is_some());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let embedder = OllamaEmbedder::new(test_config());

        let first = embedder.backoff_delay(1);
        assert!(first >= Duration::from_millis(10));
        assert!(first <= Duration::from_millis(10 + 6));

        // Past the cap the delay stops growing (modulo jitter)
        let late = embedder.backoff_delay(10);
        assert!(late <= Duration::from_millis(50 + 6));
    }

    #[test]
    fn test_dimension_reported() {
        let embedder = OllamaEmbedder::new(test_config());
        assert_eq!(embedder.dimension(), 4);
    }
}
