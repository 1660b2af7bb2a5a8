//! Similarity index abstraction.
//!
//! An index holds the (chunk, embedding) pairs of exactly one document. Backends are
//! interchangeable behind the [`Index`] trait: an in-memory map by default, or Qdrant /
//! PostgreSQL (pgvector) when configured.

mod memory;
mod pgvector;
mod qdrant;

pub use memory::InMemoryIndex;
pub use pgvector::PgVectorIndex;
pub use qdrant::QdrantIndex;

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{IndexError, PipelineError};
use crate::models::{Chunk, IndexConfig, IndexDriver, IndexEntry, ScoredChunk};
use crate::services::embedding::EmbeddingProvider;

#[async_trait]
pub trait Index: Send + Sync {
    /// Replace the entire contents of the index with `entries`.
    ///
    /// Either every entry becomes searchable or the index keeps its prior contents.
    async fn insert_all(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError>;

    /// The `k` most similar chunks, by descending cosine similarity then ascending id.
    ///
    /// Returns [`IndexError::Empty`] if nothing has been inserted yet.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError>;

    /// Number of stored chunks.
    async fn len(&self) -> Result<usize, IndexError>;

    async fn health_check(&self) -> Result<bool, IndexError>;

    /// Release whatever the backend holds for this document. Searches return
    /// [`IndexError::Empty`] afterwards.
    async fn close(&self) -> Result<(), IndexError> {
        Ok(())
    }

    fn backend(&self) -> &'static str;
}

/// Cosine similarity; 0.0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Check a batch before any backend state is touched. Returns the shared dimension.
pub fn validate_entries(entries: &[IndexEntry]) -> Result<usize, IndexError> {
    let first = entries
        .first()
        .ok_or_else(|| IndexError::InvalidEntries("no entries to insert".to_string()))?;
    let dimension = first.embedding.len();
    if dimension == 0 {
        return Err(IndexError::InvalidEntries(
            "embeddings must not be empty".to_string(),
        ));
    }

    let mut seen = std::collections::HashSet::with_capacity(entries.len());
    for entry in entries {
        if entry.embedding.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: entry.embedding.len(),
            });
        }
        if entry.embedding.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::InvalidEntries(format!(
                "chunk {} has a non-finite embedding value",
                entry.chunk.id
            )));
        }
        if !seen.insert(entry.chunk.id) {
            return Err(IndexError::InvalidEntries(format!(
                "duplicate chunk id {}",
                entry.chunk.id
            )));
        }
    }

    Ok(dimension)
}

/// Pair chunks with embeddings, failing if the counts differ.
pub fn pair_entries(
    chunks: Vec<Chunk>,
    embeddings: Vec<Vec<f32>>,
) -> Result<Vec<IndexEntry>, IndexError> {
    if chunks.len() != embeddings.len() {
        return Err(IndexError::InvalidEntries(format!(
            "{} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        )));
    }
    Ok(chunks
        .into_iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
        .collect())
}

/// Embed every chunk, then load the index in one `insert_all`.
///
/// All embedding calls finish before the index is touched, so an unreachable provider
/// leaves the index exactly as it was.
pub async fn build_index(
    index: &dyn Index,
    embedder: &dyn EmbeddingProvider,
    chunks: Vec<Chunk>,
) -> Result<usize, PipelineError> {
    let start = Instant::now();
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

    let embeddings = embedder.embed_batch(&texts).await.map_err(|e| {
        warn!(provider = embedder.name(), error = %e, "embedding failed during index build");
        PipelineError::IndexBuild(format!("embedding provider unavailable: {e}"))
    })?;
    let embed_ms = start.elapsed().as_millis();

    let entries = pair_entries(chunks, embeddings)
        .map_err(|e| PipelineError::IndexBuild(e.to_string()))?;
    let count = entries.len();

    index.insert_all(entries).await.map_err(|e| {
        warn!(backend = index.backend(), error = %e, "index insert failed");
        PipelineError::IndexBuild(e.to_string())
    })?;

    debug!(embed_ms, "embedding phase complete");
    info!(
        backend = index.backend(),
        chunks = count,
        duration_ms = start.elapsed().as_millis() as u64,
        "index built"
    );
    Ok(count)
}

/// Create an empty index for the configured backend.
pub async fn create_index(
    config: &IndexConfig,
    embedding_dim: usize,
) -> Result<Box<dyn Index>, IndexError> {
    match config.driver {
        IndexDriver::Memory => Ok(Box::new(InMemoryIndex::new())),
        IndexDriver::Qdrant => Ok(Box::new(QdrantIndex::new(config, embedding_dim as u64)?)),
        IndexDriver::PostgreSQL => Ok(Box::new(
            PgVectorIndex::new(config, embedding_dim as u32).await?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u32, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                id,
                text: format!("chunk {id}"),
                source_offset: 0,
                page: None,
            },
            embedding,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_validate_entries() {
        assert_eq!(
            validate_entries(&[entry(0, vec![1.0, 0.0]), entry(1, vec![0.0, 1.0])]).unwrap(),
            2
        );
        assert!(validate_entries(&[]).is_err());
        assert!(matches!(
            validate_entries(&[entry(0, vec![1.0, 0.0]), entry(1, vec![1.0])]),
            Err(IndexError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
        assert!(validate_entries(&[entry(0, vec![f32::NAN])]).is_err());
        assert!(validate_entries(&[entry(0, vec![1.0]), entry(0, vec![1.0])]).is_err());
    }

    #[test]
    fn test_pair_entries_length_mismatch() {
        let chunks = vec![entry(0, vec![]).chunk, entry(1, vec![]).chunk];
        assert!(pair_entries(chunks, vec![vec![1.0]]).is_err());
    }

    #[tokio::test]
    async fn test_create_memory_index() {
        let index = create_index(&IndexConfig::default(), 8).await.unwrap();
        assert_eq!(index.backend(), "memory");
        assert_eq!(index.len().await.unwrap(), 0);
    }
}
