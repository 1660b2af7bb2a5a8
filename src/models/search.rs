//! Retrieval-related models for scored chunks and their presentation.

use serde::{Deserialize, Serialize};

use super::document::Chunk;

/// Output format for answers and retrieval results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// Machine-parseable JSON format
    Json,
    /// Documentation-friendly Markdown format
    Markdown,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

/// A chunk returned by a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,

    /// Cosine similarity to the query (-1.0 to 1.0)
    pub score: f32,
}

impl ScoredChunk {
    /// Descending score, then ascending chunk id.
    pub fn rank_order(a: &ScoredChunk, b: &ScoredChunk) -> std::cmp::Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    }
}

/// Result of a retrieval-only query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResults {
    /// Question that was embedded
    pub query: String,

    /// Matching chunks in similarity order
    pub results: Vec<ScoredChunk>,

    /// Query execution time in milliseconds
    pub duration_ms: u64,
}

impl RetrievalResults {
    pub fn new(query: String, results: Vec<ScoredChunk>, duration_ms: u64) -> Self {
        Self {
            query,
            results,
            duration_ms,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }
}
