//! Configuration management for the retrieval engine

use serde::{Deserialize, Serialize};

/// Main configuration for the retrieval engine
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StacksConfig {
    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,

    /// Document/chunk store configuration
    pub store: StoreConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Search behavior settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Ingestion pipeline settings
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Temporal episode sink configuration
    #[serde(default)]
    pub episodes: EpisodeConfig,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding server URL
    pub endpoint: String,

    /// Model used for embeddings
    pub model: String,

    /// Expected output vector dimension
    pub dimension: usize,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum attempts per request (first try included)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base delay between retries in milliseconds (doubles per attempt)
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Upper bound on a single retry delay in milliseconds
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Number of texts sent per provider request
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,

    /// Concurrent in-flight batches per embed_batch call
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    /// In-memory response cache settings
    #[serde(default)]
    pub cache: EmbeddingCacheConfig,
}

/// In-memory LRU cache for embedding responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingCacheConfig {
    /// Enable or disable caching
    pub enabled: bool,

    /// Maximum number of cached vectors
    pub max_entries: usize,
}

/// Document/chunk store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database connection string
    pub database_url: String,

    /// Vector dimension enforced on every chunk write
    pub vector_dimension: usize,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters
    pub chunk_overlap: usize,

    /// Hard cap on chunk size in characters
    pub max_chunk_size: usize,

    /// Hard cap on estimated tokens per chunk
    pub max_tokens: usize,

    /// Characters per token used by the estimator
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
}

/// Search behavior settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Result count when the caller does not specify one
    pub default_match_count: usize,

    /// Hard upper bound on requested result counts
    pub max_match_count: usize,

    /// Reciprocal rank fusion constant
    pub rrf_k: u32,

    /// Per-searcher over-fetch multiplier for better fusion
    #[serde(default = "default_over_fetch")]
    pub over_fetch: usize,

    /// Per-searcher timeout in milliseconds
    pub searcher_timeout_ms: u64,

    /// Overall request deadline in milliseconds
    pub request_deadline_ms: u64,

    /// Apply the cross-encoder reranker after fusion
    #[serde(default)]
    pub use_rerank: bool,

    /// Reranker service settings
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Lexical index behavior
    #[serde(default)]
    pub lexical: LexicalConfig,
}

/// Cross-encoder reranker service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    /// Reranker service URL (empty disables reranking even if use_rerank is set)
    pub endpoint: String,

    /// Reranker model name
    pub model: String,

    /// How many fused results to send, as a multiple of match_count
    pub over_fetch: usize,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Lexical index behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalConfig {
    /// Text analyzer: "porter" (stemming + case folding) or "unicode"
    pub analyzer: String,

    /// Expand query terms with prefix matching
    pub fuzzy: bool,

    /// Minimum term length before prefix expansion applies
    pub fuzzy_prefix_length: usize,
}

/// Ingestion pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Bound on concurrent ingestions in batch imports
    pub max_concurrent_ingestions: usize,
}

/// Temporal episode sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeConfig {
    /// Enable episode emission during ingestion
    pub enabled: bool,

    /// Episode sink service URL
    pub endpoint: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum characters of document content carried in an episode
    pub excerpt_max_chars: usize,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    250
}

fn default_retry_max_delay() -> u64 {
    5_000
}

fn default_embed_batch_size() -> usize {
    16
}

fn default_max_concurrent_batches() -> usize {
    4
}

fn default_chars_per_token() -> usize {
    4
}

fn default_over_fetch() -> usize {
    2
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 768,
            timeout_secs: 30,
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            batch_size: default_embed_batch_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            cache: EmbeddingCacheConfig::default(),
        }
    }
}

impl Default for EmbeddingCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 2048,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:stacks.db".to_string(),
            vector_dimension: 768,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            max_chunk_size: 2000,
            max_tokens: 512,
            chars_per_token: default_chars_per_token(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_match_count: 10,
            max_match_count: 50,
            rrf_k: 60,
            over_fetch: default_over_fetch(),
            searcher_timeout_ms: 5_000,
            request_deadline_ms: 15_000,
            use_rerank: false,
            rerank: RerankConfig::default(),
            lexical: LexicalConfig::default(),
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: "bge-reranker-base".to_string(),
            over_fetch: 3,
            timeout_secs: 10,
        }
    }
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            analyzer: "porter".to_string(),
            fuzzy: true,
            fuzzy_prefix_length: 3,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_ingestions: 5,
        }
    }
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            timeout_secs: 30,
            excerpt_max_chars: 2000,
        }
    }
}

impl StacksConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string(self)?,
            Some("yaml") | Some("yml") => serde_yml::to_string(self)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.embedding.endpoint.starts_with("http") {
            return Err(anyhow::anyhow!(
                "Invalid embedding endpoint: {}",
                self.embedding.endpoint
            ));
        }

        if self.embedding.model.is_empty() {
            return Err(anyhow::anyhow!("Embedding model name cannot be empty"));
        }

        if self.embedding.dimension == 0 {
            return Err(anyhow::anyhow!(
                "Embedding dimension must be greater than 0"
            ));
        }

        if self.store.vector_dimension == 0 {
            return Err(anyhow::anyhow!("Vector dimension must be greater than 0"));
        }

        if self.store.vector_dimension != self.embedding.dimension {
            return Err(anyhow::anyhow!(
                "Store vector dimension ({}) does not match embedding dimension ({})",
                self.store.vector_dimension,
                self.embedding.dimension
            ));
        }

        if self.chunking.chunk_size == 0 {
            return Err(anyhow::anyhow!("Chunk size must be greater than 0"));
        }

        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(anyhow::anyhow!(
                "Chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            ));
        }

        if self.chunking.max_chunk_size < self.chunking.chunk_size {
            return Err(anyhow::anyhow!(
                "Max chunk size ({}) must be at least chunk size ({})",
                self.chunking.max_chunk_size,
                self.chunking.chunk_size
            ));
        }

        if self.search.default_match_count == 0
            || self.search.default_match_count > self.search.max_match_count
        {
            return Err(anyhow::anyhow!(
                "Default match count must be in 1..=max_match_count"
            ));
        }

        if self.search.over_fetch == 0 {
            return Err(anyhow::anyhow!("Search over-fetch must be greater than 0"));
        }

        match self.search.lexical.analyzer.as_str() {
            "porter" | "unicode" => {}
            other => {
                return Err(anyhow::anyhow!("Unknown lexical analyzer: {}", other));
            }
        }

        if self.ingestion.max_concurrent_ingestions == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent ingestions must be greater than 0"
            ));
        }

        if self.episodes.enabled && self.episodes.endpoint.is_empty() {
            return Err(anyhow::anyhow!(
                "Episode sink enabled but no endpoint configured"
            ));
        }

        Ok(())
    }
}
