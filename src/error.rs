//! Error types for docqa.

use thiserror::Error;

use crate::services::PipelineState;
use crate::utils::retry::Retryable;

/// Errors raised while turning a raw document into text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("not a valid document container: {0}")]
    InvalidContainer(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("document is not valid UTF-8 text: {0}")]
    InvalidEncoding(#[from] std::string::FromUtf8Error),

    #[error("document too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors related to chunking.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("document contains no extractable text")]
    EmptyDocument,

    #[error("invalid chunking parameters: {0}")]
    InvalidParameters(String),
}

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding provider: {0}")]
    ConnectionError(String),

    #[error("embedding provider error: {0}")]
    ServerError(String),

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("embedding provider rejected credentials: {0}")]
    Unauthorized(String),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding daemon error: {0}")]
    Daemon(#[from] DaemonError),

    #[error("embedding timeout")]
    Timeout,
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::ConnectionError(_) | EmbeddingError::Timeout => true,
            EmbeddingError::ServerError(msg) => is_transient_status(msg),
            EmbeddingError::RequestError(e) => e.is_timeout() || e.is_connect(),
            EmbeddingError::Unauthorized(_)
            | EmbeddingError::InvalidResponse(_)
            | EmbeddingError::Daemon(_) => false,
        }
    }
}

/// Errors related to index (vector store) operations.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index is empty: no document has been indexed")]
    Empty,

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid index entries: {0}")]
    InvalidEntries(String),

    #[error("failed to connect to index backend: {0}")]
    ConnectionError(String),

    #[error("collection error: {0}")]
    CollectionError(String),

    #[error("upsert error: {0}")]
    UpsertError(String),

    #[error("search error: {0}")]
    SearchError(String),

    #[error("PostgreSQL error: {0}")]
    PostgresError(String),

    #[error("pgvector extension error: {0}")]
    PgVectorExtensionError(String),
}

/// Errors related to answer generation.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("completion request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("completion provider error: {0}")]
    ServerError(String),

    #[error("completion provider rejected credentials: {0}")]
    Unauthorized(String),

    #[error("invalid completion response: {0}")]
    InvalidResponse(String),

    #[error("completion timeout")]
    Timeout,
}

impl Retryable for SynthesisError {
    fn is_retryable(&self) -> bool {
        match self {
            SynthesisError::Timeout => true,
            SynthesisError::ServerError(msg) => is_transient_status(msg),
            SynthesisError::RequestError(e) => e.is_timeout() || e.is_connect(),
            SynthesisError::Unauthorized(_) | SynthesisError::InvalidResponse(_) => false,
        }
    }
}

fn is_transient_status(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    msg.contains("503")
        || msg.contains("502")
        || msg.contains("504")
        || msg.contains("429")
        || lower.contains("unavailable")
        || lower.contains("too many requests")
}

/// The pipeline-level error taxonomy surfaced to the user.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not read document: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("document contains no extractable text; upload a different document")]
    EmptyDocument,

    #[error("failed to build index: {0}")]
    IndexBuild(String),

    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(#[source] EmbeddingError),

    #[error("no document has been indexed yet")]
    EmptyIndex,

    #[error("index search failed: {0}")]
    Search(#[source] IndexError),

    #[error("answer generation failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("invalid question: {0}")]
    InvalidQuestion(String),

    #[error("session is not ready for questions (state: {state})")]
    NotReady { state: PipelineState },

    #[error("document was replaced while the request was in flight")]
    Superseded,
}

impl PipelineError {
    /// Errors that end the current document; the user has to load a document again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineError::Extraction(_) | PipelineError::EmptyDocument | PipelineError::IndexBuild(_)
        )
    }
}

impl From<ChunkError> for PipelineError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::EmptyDocument => PipelineError::EmptyDocument,
            ChunkError::InvalidParameters(msg) => PipelineError::IndexBuild(msg),
        }
    }
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),
}

/// Errors raised by the local ONNX embedding model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model not found: {0}")]
    NotFound(String),

    #[error("failed to load model: {0}")]
    LoadError(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),

    #[error("inference error: {0}")]
    InferenceError(String),
}

/// Errors talking to the embedding daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("daemon is not running")]
    NotRunning,

    #[error("failed to spawn daemon: {0}")]
    SpawnError(String),

    #[error("failed to connect to daemon: {0}")]
    ConnectionFailed(String),

    #[error("socket error: {0}")]
    SocketError(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("timed out waiting for daemon")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Application-level errors that wrap domain errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_error_retryable() {
        assert!(EmbeddingError::Timeout.is_retryable());
        assert!(EmbeddingError::ConnectionError("refused".into()).is_retryable());
        assert!(EmbeddingError::ServerError("status 503: busy".into()).is_retryable());
        assert!(!EmbeddingError::ServerError("status 400: bad".into()).is_retryable());
        assert!(!EmbeddingError::Unauthorized("bad key".into()).is_retryable());
    }

    #[test]
    fn test_synthesis_error_retryable() {
        assert!(SynthesisError::ServerError("status 429: Too Many Requests".into()).is_retryable());
        assert!(!SynthesisError::InvalidResponse("no choices".into()).is_retryable());
    }

    #[test]
    fn test_chunk_error_maps_to_empty_document() {
        let err: PipelineError = ChunkError::EmptyDocument.into();
        assert!(matches!(err, PipelineError::EmptyDocument));
        assert!(err.is_terminal());
    }

    #[test]
    fn test_per_query_errors_are_not_terminal() {
        assert!(!PipelineError::EmptyIndex.is_terminal());
        assert!(!PipelineError::Synthesis(SynthesisError::Timeout).is_terminal());
        assert!(!PipelineError::EmbeddingUnavailable(EmbeddingError::Timeout).is_terminal());
        assert!(!PipelineError::Search(IndexError::SearchError("reset".into())).is_terminal());
    }
}
