use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("document has no readable page text: {0}")]
    EmptyDocument(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no chunks were indexed from {0}")]
    NothingIndexed(String),

    #[error("embedding failed: {0}")]
    Embedding(#[from] ServiceError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("chunk {0} is already indexed")]
    DuplicateChunk(String),

    #[error("no index found at {0}")]
    MissingIndex(String),

    #[error("corrupt index at {location}: {details}")]
    CorruptIndex { location: String, details: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IndexError {
    pub(crate) fn corrupt(location: &std::path::Path, details: impl Into<String>) -> Self {
        Self::CorruptIndex {
            location: location.display().to_string(),
            details: details.into(),
        }
    }
}

/// Failures of the external embedding and language-model services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} unavailable: {details}")]
    Unavailable { service: String, details: String },

    #[error("{service} rate limited the request")]
    RateLimited {
        service: String,
        retry_after_secs: Option<u64>,
    },

    #[error("{service} did not answer within {after:?}")]
    Timeout { service: String, after: Duration },

    #[error("invalid response from {service}: {details}")]
    InvalidResponse { service: String, details: String },
}

impl ServiceError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidResponse { .. })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("prompt has no messages")]
    Empty,

    #[error("message {0} has empty content")]
    EmptyContent(usize),

    #[error("system message at position {0}; system instructions must come first")]
    MisplacedSystem(usize),

    #[error("prompt must end with a user message")]
    MissingUserTurn,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("invalid prompt: {0}")]
    Prompt(#[from] PromptError),
}
