//! Error types for kihub.

use thiserror::Error;

/// Library-level error type for kihub operations.
#[derive(Error, Debug)]
pub enum KihubError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Incompatible index: {0}")]
    IncompatibleIndex(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Web search unavailable: {0}")]
    WebSearchUnavailable(String),

    #[error("Generation failed: {message}")]
    Generation {
        message: String,
        /// Answer text already streamed before the failure.
        partial: String,
    },

    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Text extraction failed: {0}")]
    DocumentExtraction(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl KihubError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, KihubError::EmbeddingProvider(_) | KihubError::Http(_))
    }

    /// Partial answer carried by a generation failure, if any.
    pub fn partial_answer(&self) -> Option<&str> {
        match self {
            KihubError::Generation { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

/// Result type alias for kihub operations.
pub type Result<T> = std::result::Result<T, KihubError>;
