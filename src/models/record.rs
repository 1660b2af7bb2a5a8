use serde::{Deserialize, Serialize};

use super::search::ScoredChunk;

/// One answered question. Never mutated after it joins a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub question: String,
    pub answer: String,
    /// Chunk ids in the order they were handed to the synthesizer
    pub retrieved_chunk_ids: Vec<u32>,
    pub scores: Vec<f32>,
    pub asked_at: String,
}

impl QueryRecord {
    pub fn new(question: impl Into<String>, answer: impl Into<String>, retrieved: &[ScoredChunk]) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            retrieved_chunk_ids: retrieved.iter().map(|r| r.chunk.id).collect(),
            scores: retrieved.iter().map(|r| r.score).collect(),
            asked_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// A record together with the chunks it was answered from, for rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerReport {
    pub document: String,
    pub record: QueryRecord,
    pub sources: Vec<ScoredChunk>,
    pub duration_ms: u64,
}
