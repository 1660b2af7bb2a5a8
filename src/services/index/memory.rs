//! In-memory index with exact cosine search.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Index, cosine_similarity, validate_entries};
use crate::error::IndexError;
use crate::models::{Chunk, IndexEntry, ScoredChunk};

#[derive(Debug, Default)]
struct Entries {
    dimension: usize,
    by_id: BTreeMap<u32, (Vec<f32>, Chunk)>,
}

/// Index held in process memory for the lifetime of one document.
///
/// `insert_all` builds the replacement map before taking the write lock, so readers see
/// either the old contents or the complete new contents, never a partial build.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    entries: RwLock<Option<Entries>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Index for InMemoryIndex {
    async fn insert_all(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let dimension = validate_entries(&entries)?;

        let by_id = entries
            .into_iter()
            .map(|e| (e.chunk.id, (e.embedding, e.chunk)))
            .collect();

        *self.entries.write().await = Some(Entries { dimension, by_id });
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        let guard = self.entries.read().await;
        let entries = guard.as_ref().ok_or(IndexError::Empty)?;

        if query.len() != entries.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: entries.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<ScoredChunk> = entries
            .by_id
            .values()
            .map(|(embedding, chunk)| ScoredChunk {
                chunk: chunk.clone(),
                score: cosine_similarity(embedding, query),
            })
            .collect();

        scored.sort_by(ScoredChunk::rank_order);
        scored.truncate(k);
        Ok(scored)
    }

    async fn len(&self) -> Result<usize, IndexError> {
        Ok(self
            .entries
            .read()
            .await
            .as_ref()
            .map_or(0, |e| e.by_id.len()))
    }

    async fn health_check(&self) -> Result<bool, IndexError> {
        Ok(true)
    }

    async fn close(&self) -> Result<(), IndexError> {
        self.entries.write().await.take();
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
