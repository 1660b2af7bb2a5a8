//! Sentence-transformer inference with ONNX Runtime.

use std::path::Path;
use std::sync::{Arc, Mutex};

use ndarray::{ArrayViewD, Axis};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams, TruncationStrategy};
use tracing::debug;

use crate::error::ModelError;
use crate::models::{DEFAULT_LOCAL_DIMENSION, EmbeddingConfig};

/// Encodes text with a mean-pooled, L2-normalized sentence embedding model.
///
/// Expects `model.onnx` and `tokenizer.json` in the model directory, as exported for
/// `sentence-transformers` models.
pub struct EmbeddingModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimension: usize,
    uses_token_types: bool,
}

impl EmbeddingModel {
    pub fn load(config: &EmbeddingConfig, model_dir: &Path) -> Result<Self, ModelError> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        if !model_path.exists() {
            return Err(ModelError::NotFound(format!(
                "{} (download the ONNX export of {} into {})",
                model_path.display(),
                config.model_id,
                model_dir.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e: ort::Error| ModelError::LoadError(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e: ort::Error| ModelError::LoadError(e.to_string()))?
            .with_intra_threads(num_cpus())
            .map_err(|e: ort::Error| ModelError::LoadError(e.to_string()))?
            .commit_from_file(&model_path)
            .map_err(|e: ort::Error| ModelError::LoadError(e.to_string()))?;

        let uses_token_types = session.inputs.iter().any(|i| i.name == "token_type_ids");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| ModelError::TokenizerError(e.to_string()))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_tokens as usize,
                strategy: TruncationStrategy::LongestFirst,
                ..Default::default()
            }))
            .map_err(|e| ModelError::TokenizerError(e.to_string()))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        let dimension = config.dimension.unwrap_or(DEFAULT_LOCAL_DIMENSION) as usize;
        debug!(model = %config.model_id, dimension, uses_token_types, "onnx session ready");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimension,
            uses_token_types,
        })
    }

    /// Questions and passages are encoded the same way.
    pub fn embed(&self, texts: &[String], _is_query: bool) -> Result<Vec<Vec<f32>>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| ModelError::TokenizerError(e.to_string()))?;

        let batch_size = encodings.len();
        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut input_ids = vec![0i64; batch_size * seq_len];
        let mut attention_mask = vec![0i64; batch_size * seq_len];
        let mut token_type_ids = vec![0i64; batch_size * seq_len];
        let mut masks: Vec<Vec<u32>> = Vec::with_capacity(batch_size);

        for (i, encoding) in encodings.iter().enumerate() {
            let row = i * seq_len;
            for (j, &id) in encoding.get_ids().iter().enumerate() {
                input_ids[row + j] = i64::from(id);
            }
            for (j, &m) in encoding.get_attention_mask().iter().enumerate() {
                attention_mask[row + j] = i64::from(m);
            }
            for (j, &t) in encoding.get_type_ids().iter().enumerate() {
                token_type_ids[row + j] = i64::from(t);
            }
            masks.push(encoding.get_attention_mask().to_vec());
        }

        let shape = [batch_size, seq_len];
        let to_tensor = |data: Vec<i64>| {
            Tensor::from_array((shape, data))
                .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))
        };

        let mut inputs = ort::inputs![
            "input_ids" => to_tensor(input_ids)?,
            "attention_mask" => to_tensor(attention_mask)?,
        ];
        if self.uses_token_types {
            inputs.push(("token_type_ids".into(), to_tensor(token_type_ids)?.into()));
        }

        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::InferenceError("session lock poisoned".to_string()))?;

        let outputs = session
            .run(inputs)
            .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))?;

        let hidden = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))?;

        let embeddings = pool(&hidden, &masks)?;
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(ModelError::InferenceError(format!(
                "model produced {}-dimensional embeddings, configured for {}",
                bad.len(),
                self.dimension
            )));
        }
        Ok(embeddings)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Token-level output `[batch, seq, hidden]` is mean-pooled over unmasked tokens;
/// sentence-level output `[batch, hidden]` is used as is. Both are L2-normalized.
fn pool(hidden: &ArrayViewD<'_, f32>, masks: &[Vec<u32>]) -> Result<Vec<Vec<f32>>, ModelError> {
    match hidden.ndim() {
        3 => Ok(hidden
            .axis_iter(Axis(0))
            .zip(masks)
            .map(|(tokens, mask)| {
                let width = tokens.shape()[1];
                let mut sum = vec![0.0f32; width];
                let mut count = 0.0f32;
                for (token, &m) in tokens.axis_iter(Axis(0)).zip(mask) {
                    if m == 0 {
                        continue;
                    }
                    count += 1.0;
                    for (acc, v) in sum.iter_mut().zip(token.iter()) {
                        *acc += v;
                    }
                }
                if count > 0.0 {
                    sum.iter_mut().for_each(|v| *v /= count);
                }
                normalize(&sum)
            })
            .collect()),
        2 => Ok(hidden
            .axis_iter(Axis(0))
            .map(|row| normalize(&row.iter().copied().collect::<Vec<f32>>()))
            .collect()),
        n => Err(ModelError::InferenceError(format!(
            "unexpected output rank {}: {:?}",
            n,
            hidden.shape()
        ))),
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

pub type SharedEmbeddingModel = Arc<EmbeddingModel>;
