pub mod chunker;
pub mod embedding;
pub mod extractor;
pub mod index;
pub mod metrics;
pub mod retriever;
pub mod session;
pub mod synthesizer;

pub use chunker::TextChunker;
pub use embedding::{EmbeddingProvider, create_provider};
pub use extractor::extract;
pub use index::{Index, InMemoryIndex, build_index, create_index};
pub use metrics::{MetricsStore, MetricsSummary, RequestKind};
pub use retriever::Retriever;
pub use session::{ChatSession, History, PipelineState};
pub use synthesizer::{AnswerSynthesizer, OpenAiSynthesizer, RetrievalOnly, build_prompt};
