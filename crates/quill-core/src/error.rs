//! Error types for Quill

use thiserror::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Quill pipeline
#[derive(Error, Debug)]
pub enum Error {
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Chunk store error: {0}")]
    ChunkStore(String),

    #[error("Session store error: {0}")]
    SessionStore(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`], used by callers that need to tell
/// configuration problems apart from upstream failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unparseable or corrupt source document.
    Ingestion,
    /// Missing credential, invalid setting or unavailable provider integration.
    Configuration,
    /// Upstream generation/embedding failure, including timeouts.
    Provider,
    /// The request was cancelled before it completed.
    Cancelled,
    /// Local persistence failure (chunk store or session store).
    Storage,
    /// The caller supplied something unusable.
    InvalidInput,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Ingestion(_) => ErrorKind::Ingestion,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Provider(_) | Error::Timeout(_) => ErrorKind::Provider,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::ChunkStore(_) | Error::SessionStore(_) | Error::Serialization(_) | Error::Io(_) => {
                ErrorKind::Storage
            }
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Provider(err.to_string())
    }
}
