//! Embedding providers.
//!
//! Every provider maps text to a fixed-dimension vector. Queries and document chunks go
//! through separate entry points because some models embed them differently.

mod daemon;
mod openai;

pub use daemon::DaemonEmbeddings;
pub use openai::OpenAiEmbeddings;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ConfigError, EmbeddingError};
use crate::models::{Config, EmbeddingProviderKind};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single query text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed document chunks. Output order matches input order.
    ///
    /// The default calls [`embed`](EmbeddingProvider::embed) once per text.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Build the provider selected in `[embedding] provider`.
pub fn create_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>, ConfigError> {
    match config.embedding.provider {
        EmbeddingProviderKind::OpenAi => {
            let api_key = config.require_openai_key()?;
            let provider = OpenAiEmbeddings::new(&config.embedding, api_key)
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            Ok(Arc::new(provider))
        }
        EmbeddingProviderKind::Local => Ok(Arc::new(DaemonEmbeddings::new(config))),
    }
}
