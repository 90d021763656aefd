//! Error handling for the retrieval engine

use thiserror::Error;

/// Result type alias for the retrieval engine
pub type Result<T> = std::result::Result<T, CoreError>;

/// Main error type for the retrieval engine
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Episode sink error: {0}")]
    Episode(#[from] EpisodeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad input: {0}")]
    BadInput(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Embedding dimension mismatch: store expects {expected}, embedder produces {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors from the embedding provider
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Rejected input: {0}")]
    RejectedInput(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout: embedding request took too long")]
    Timeout,

    #[error("Retry budget exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl EmbeddingError {
    /// Transient provider failures are worth another attempt; 4xx are not.
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::ConnectionFailed(_) | EmbeddingError::Timeout => true,
            EmbeddingError::Provider { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Errors from the document/chunk store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Search failed: {0}")]
    SearchFailed(String),

    #[error("Storage failed: {0}")]
    StorageFailed(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),
}

/// Errors from the retrieval engine's query path
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("All searchers failed: {0}")]
    AllSearchersFailed(String),

    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    #[error("Reranker failed: {0}")]
    RerankFailed(String),

    #[error("Invalid search request: {0}")]
    InvalidRequest(String),
}

/// Errors from the temporal episode sink
#[derive(Error, Debug)]
pub enum EpisodeError {
    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("Sink rejected episode {key}: {reason}")]
    Rejected { key: String, reason: String },

    #[error("Invalid sink response: {0}")]
    InvalidResponse(String),

    #[error("Timeout: episode sink took too long")]
    Timeout,
}

/// Closed set of error categories exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadInput,
    AccessDenied,
    NotFound,
    Conflict,
    DependencyUnavailable,
    DimensionMismatch,
    Timeout,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadInput => "bad_input",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::DependencyUnavailable => "dependency_unavailable",
            ErrorKind::DimensionMismatch => "dimension_mismatch",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl CoreError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Embedding(e) => e.is_transient(),
            CoreError::Episode(EpisodeError::SinkUnavailable(_))
            | CoreError::Episode(EpisodeError::Timeout) => true,
            CoreError::Http(_) => true,
            CoreError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Get the error category for callers and logging
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Embedding(EmbeddingError::RejectedInput(_)) => ErrorKind::BadInput,
            CoreError::Embedding(_) => ErrorKind::DependencyUnavailable,
            CoreError::Store(StoreError::InvalidDimension { .. }) => ErrorKind::DimensionMismatch,
            CoreError::Store(StoreError::DocumentNotFound(_)) => ErrorKind::NotFound,
            CoreError::Store(_) => ErrorKind::DependencyUnavailable,
            CoreError::Search(SearchError::AllSearchersFailed(_)) => {
                ErrorKind::DependencyUnavailable
            }
            CoreError::Search(SearchError::DeadlineExceeded) => ErrorKind::Timeout,
            CoreError::Search(SearchError::InvalidRequest(_)) => ErrorKind::BadInput,
            CoreError::Search(_) => ErrorKind::Internal,
            CoreError::Episode(_) => ErrorKind::DependencyUnavailable,
            CoreError::Config(_) => ErrorKind::BadInput,
            CoreError::BadInput(_) => ErrorKind::BadInput,
            CoreError::AccessDenied(_) => ErrorKind::AccessDenied,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            CoreError::Timeout(_) => ErrorKind::Timeout,
            CoreError::Cancelled(_) => ErrorKind::Cancelled,
            CoreError::Database(_) | CoreError::Http(_) => ErrorKind::DependencyUnavailable,
            CoreError::Io(_) | CoreError::Serialization(_) => ErrorKind::Internal,
        }
    }
}
