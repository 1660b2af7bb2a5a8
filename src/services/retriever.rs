use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::error::{IndexError, PipelineError};
use crate::models::{RetrievalResults, ScoredChunk};
use crate::services::embedding::EmbeddingProvider;
use crate::services::index::Index;

/// Embeds a question and fetches the most similar chunks from an index.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder }
    }

    /// Top-`k` chunks for `question`, most similar first.
    pub async fn retrieve(
        &self,
        index: &dyn Index,
        question: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, PipelineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::InvalidQuestion(
                "question must not be empty".to_string(),
            ));
        }

        let query = self
            .embedder
            .embed(question)
            .await
            .map_err(PipelineError::EmbeddingUnavailable)?;

        let results = index.search(&query, k).await.map_err(|e| match e {
            IndexError::Empty => PipelineError::EmptyIndex,
            other => PipelineError::Search(other),
        })?;

        debug!(k, returned = results.len(), "retrieved chunks");
        Ok(results)
    }

    /// Like [`retrieve`](Self::retrieve), with timing for diagnostics output.
    pub async fn retrieve_timed(
        &self,
        index: &dyn Index,
        question: &str,
        k: usize,
    ) -> Result<RetrievalResults, PipelineError> {
        let start = Instant::now();
        let results = self.retrieve(index, question, k).await?;
        Ok(RetrievalResults::new(
            question.trim().to_string(),
            results,
            start.elapsed().as_millis() as u64,
        ))
    }
}
