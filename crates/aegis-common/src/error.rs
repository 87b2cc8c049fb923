//! Error types and result handling for the Aegis control plane

use thiserror::Error;

/// Result type alias for Aegis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Aegis control-plane operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Indexing error: {0}")]
    Indexing(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Network(e.to_string())
        }
    }
}

impl Error {
    /// Check if the error is worth retrying at the point of origin
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Timeout(_) | Error::Embedding(_) | Error::Database(_)
        )
    }

    /// Get error category for logging and status surfaces
    pub fn category(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Database(_) | Error::Migrate(_) => "database",
            Error::VectorStore(_) => "vector_store",
            Error::ObjectStore(_) => "object_store",
            Error::Embedding(_) => "embedding",
            Error::Runtime(_) => "runtime",
            Error::Gpu(_) => "gpu",
            Error::Parse(_) => "parse",
            Error::Indexing(_) => "indexing",
            Error::Network(_) => "network",
            Error::Timeout(_) => "timeout",
            Error::InvalidRequest(_) => "request",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
            Error::Generic(_) => "generic",
        }
    }
}
