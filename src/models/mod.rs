mod config;
mod document;
mod record;
mod search;

pub use config::{
    ChunkingConfig, Config, DEFAULT_CHAT_MODEL, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
    DEFAULT_COLLECTION, DEFAULT_EMBEDDING_DIMENSION, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_LOCAL_DIMENSION, DEFAULT_LOCAL_MODEL_ID,
    DEFAULT_METRICS_RETENTION_DAYS, DEFAULT_OPENAI_BASE_URL, DEFAULT_QDRANT_URL, DEFAULT_TOP_K,
    DaemonConfig, EmbeddingConfig, EmbeddingProviderKind, IndexConfig, IndexDriver, LlmConfig,
    MetricsConfig, ResolvedConfig, RetrievalConfig,
};
pub use document::{Chunk, Document, DocumentFormat, DocumentInfo, ExtractedText, IndexEntry};
pub use record::{AnswerReport, QueryRecord};
pub use search::{OutputFormat, RetrievalResults, ScoredChunk};
