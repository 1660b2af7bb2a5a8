//! Sliding-window text chunking with overlap.

use crate::error::ChunkError;
use crate::models::{Chunk, ChunkingConfig, ExtractedText};

/// Splits text into fixed-width overlapping character windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunker {
    /// Maximum characters per chunk
    chunk_size: usize,
    /// Characters repeated between consecutive chunks
    overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::InvalidParameters(
                "chunk size must be at least 1".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(ChunkError::InvalidParameters(format!(
                "overlap ({overlap}) must be smaller than chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self, ChunkError> {
        Self::new(config.chunk_size as usize, config.chunk_overlap as usize)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Chunk `text` into windows of `chunk_size` characters advancing by `chunk_size - overlap`.
    ///
    /// The last window may be shorter. Windows stop as soon as one reaches the end of the
    /// text, so every character is covered and no window is a suffix of its predecessor.
    pub fn chunk(&self, text: &str) -> Result<Vec<Chunk>, ChunkError> {
        let chars: Vec<char> = text.chars().collect();
        let total_chars = chars.len();

        if total_chars == 0 {
            return Err(ChunkError::EmptyDocument);
        }

        let mut chunks = Vec::with_capacity(total_chars.div_ceil(self.step()));
        let mut start = 0;

        loop {
            let end = (start + self.chunk_size).min(total_chars);
            chunks.push(Chunk {
                id: chunks.len() as u32,
                text: chars[start..end].iter().collect(),
                source_offset: start,
                page: None,
            });

            if end >= total_chars {
                break;
            }
            start += self.step();
        }

        Ok(chunks)
    }

    /// Chunk extracted text and label each chunk with the page its first character is on.
    pub fn chunk_with_pages(&self, extracted: &ExtractedText) -> Result<Vec<Chunk>, ChunkError> {
        let mut chunks = self.chunk(&extracted.text)?;
        for chunk in &mut chunks {
            chunk.page = extracted.page_for_offset(chunk.source_offset);
        }
        Ok(chunks)
    }
}

/// Rebuild the original text from its chunks by dropping each chunk's overlap with its
/// predecessor.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut text = String::new();
    let mut covered: usize = 0;
    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.source_offset);
        text.extend(chunk.text.chars().skip(skip));
        covered = chunk.source_offset + chunk.text.chars().count();
    }
    text
}
