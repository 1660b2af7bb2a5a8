use async_trait::async_trait;

use super::EmbeddingProvider;
use crate::client::DaemonClient;
use crate::error::EmbeddingError;
use crate::models::{Config, DEFAULT_LOCAL_DIMENSION};

/// Embeddings from the local ONNX model served by `docqa serve`.
///
/// The daemon is started on first use when `daemon.auto_start` is set.
pub struct DaemonEmbeddings {
    client: DaemonClient,
    model_id: String,
    dimension: usize,
    batch_size: usize,
}

impl DaemonEmbeddings {
    pub fn new(config: &Config) -> Self {
        Self {
            client: DaemonClient::new(config),
            model_id: config.embedding.model_id.clone(),
            dimension: config
                .embedding
                .dimension
                .unwrap_or(DEFAULT_LOCAL_DIMENSION) as usize,
            batch_size: config.embedding.batch_size.max(1) as usize,
        }
    }

    fn check_dimensions(&self, embeddings: &[Vec<f32>]) -> Result<(), EmbeddingError> {
        match embeddings.iter().find(|e| e.len() != self.dimension) {
            Some(bad) => Err(EmbeddingError::InvalidResponse(format!(
                "daemon returned {}-dimensional embedding, expected {}",
                bad.len(),
                self.dimension
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for DaemonEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let embeddings = self.client.embed(vec![text.to_string()], true).await?;
        self.check_dimensions(&embeddings)?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embeddings = self.client.embed(batch.to_vec(), false).await?;
            self.check_dimensions(&embeddings)?;
            all_embeddings.extend(embeddings);
        }
        Ok(all_embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model_id
    }
}
