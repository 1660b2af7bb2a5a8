//! One user's conversation with one document.
//!
//! A [`ChatSession`] moves through `Empty → Indexing → Ready ⇄ Querying` and back to
//! `Empty` whenever a new document is loaded or the session is reset. Every load and
//! reset bumps a generation counter; work that started under an older generation is
//! discarded when it completes instead of touching the newer session state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ChunkError, ExtractionError, PipelineError};
use crate::models::{
    AnswerReport, Config, Document, DocumentInfo, IndexConfig, QueryRecord, RetrievalResults,
};
use crate::services::chunker::TextChunker;
use crate::services::embedding::EmbeddingProvider;
use crate::services::extractor::extract;
use crate::services::index::{Index, build_index, create_index};
use crate::services::retriever::Retriever;
use crate::services::synthesizer::AnswerSynthesizer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    #[default]
    Empty,
    Indexing,
    Ready,
    Querying,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Empty => write!(f, "empty"),
            PipelineState::Indexing => write!(f, "indexing"),
            PipelineState::Ready => write!(f, "ready"),
            PipelineState::Querying => write!(f, "querying"),
        }
    }
}

/// Append-only, chronological record of answered questions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    records: Vec<QueryRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: QueryRecord) {
        self.records.push(record);
    }

    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// Oldest first. The iterator is `Clone`, so a consumer can restart it.
    pub fn iter(&self) -> std::slice::Iter<'_, QueryRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&QueryRecord> {
        self.records.last()
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a QueryRecord;
    type IntoIter = std::slice::Iter<'a, QueryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Default)]
struct SessionInner {
    state: PipelineState,
    document: Option<DocumentInfo>,
    index: Option<Arc<dyn Index>>,
    history: History,
}

pub struct ChatSession {
    embedder: Arc<dyn EmbeddingProvider>,
    synthesizer: Arc<dyn AnswerSynthesizer>,
    retriever: Retriever,
    chunker: TextChunker,
    index_config: IndexConfig,
    top_k: usize,
    max_document_bytes: u64,
    generation: AtomicU64,
    inner: Mutex<SessionInner>,
}

impl ChatSession {
    pub fn new(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        synthesizer: Arc<dyn AnswerSynthesizer>,
    ) -> Result<Self, ChunkError> {
        Ok(Self {
            retriever: Retriever::new(Arc::clone(&embedder)),
            embedder,
            synthesizer,
            chunker: TextChunker::from_config(&config.chunking)?,
            index_config: config.index.clone(),
            top_k: config.retrieval.top_k as usize,
            max_document_bytes: config.chunking.max_document_bytes,
            generation: AtomicU64::new(0),
            inner: Mutex::new(SessionInner::default()),
        })
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Replace the active document: extract, chunk, embed and index it.
    ///
    /// History is cleared up front. On failure the session is left `Empty`.
    pub async fn load_document(&self, document: Document) -> Result<DocumentInfo, PipelineError> {
        let (generation, previous) = {
            let mut inner = self.lock();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let previous = std::mem::replace(
                &mut *inner,
                SessionInner {
                    state: PipelineState::Indexing,
                    ..Default::default()
                },
            );
            (generation, previous.index)
        };
        release(previous).await;

        let start = Instant::now();
        match self.build(&document).await {
            Ok((index, info)) => match self.install(generation, index, &info) {
                Ok(()) => {
                    info!(
                        document = %info.name,
                        pages = info.pages,
                        chunks = info.chunks,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "document ready"
                    );
                    Ok(info)
                }
                Err(stale) => {
                    debug!(document = %document.name, "discarding superseded index build");
                    release(Some(stale)).await;
                    Err(PipelineError::Superseded)
                }
            },
            Err(e) => {
                let mut inner = self.lock();
                if !self.is_current(generation) {
                    return Err(PipelineError::Superseded);
                }
                warn!(document = %document.name, error = %e, "document load failed");
                inner.state = PipelineState::Empty;
                Err(e)
            }
        }
    }

    /// Make a finished build active, or hand the index back if the session moved on.
    fn install(
        &self,
        generation: u64,
        index: Arc<dyn Index>,
        info: &DocumentInfo,
    ) -> Result<(), Arc<dyn Index>> {
        let mut inner = self.lock();
        if !self.is_current(generation) {
            return Err(index);
        }
        inner.state = PipelineState::Ready;
        inner.index = Some(index);
        inner.document = Some(info.clone());
        Ok(())
    }

    async fn build(
        &self,
        document: &Document,
    ) -> Result<(Arc<dyn Index>, DocumentInfo), PipelineError> {
        let size = document.bytes.len() as u64;
        if size > self.max_document_bytes {
            return Err(ExtractionError::TooLarge {
                size,
                limit: self.max_document_bytes,
            }
            .into());
        }

        let extracted = extract(&document.bytes, document.format)?;
        if extracted.is_blank() {
            return Err(PipelineError::EmptyDocument);
        }

        let chunks = self.chunker.chunk_with_pages(&extracted)?;
        debug!(chunks = chunks.len(), pages = extracted.page_count(), "document chunked");

        let index = create_index(&self.index_config, self.embedder.dimension())
            .await
            .map_err(|e| PipelineError::IndexBuild(e.to_string()))?;
        let count = build_index(index.as_ref(), self.embedder.as_ref(), chunks).await?;

        let mut info = document.info();
        info.pages = extracted.page_count();
        info.chunks = count;
        Ok((Arc::from(index), info))
    }

    /// Answer `question` from the active document and append it to the history.
    pub async fn ask(&self, question: &str) -> Result<QueryRecord, PipelineError> {
        self.ask_with_sources(question).await.map(|report| report.record)
    }

    /// Like [`ask`](Self::ask), also returning the passages the answer was built from.
    ///
    /// A failed question is not recorded and leaves the session `Ready`.
    pub async fn ask_with_sources(&self, question: &str) -> Result<AnswerReport, PipelineError> {
        if question.trim().is_empty() {
            return Err(PipelineError::InvalidQuestion(
                "question must not be empty".to_string(),
            ));
        }

        let (generation, index, document) = {
            let mut inner = self.lock();
            let (Some(index), PipelineState::Ready) = (inner.index.clone(), inner.state) else {
                return Err(match inner.state {
                    PipelineState::Empty => PipelineError::EmptyIndex,
                    state => PipelineError::NotReady { state },
                });
            };
            inner.state = PipelineState::Querying;
            let document = inner
                .document
                .as_ref()
                .map(|d| d.name.clone())
                .unwrap_or_default();
            (self.generation.load(Ordering::SeqCst), index, document)
        };

        let start = Instant::now();
        let result = self.answer(index.as_ref(), question).await;

        let mut inner = self.lock();
        if !self.is_current(generation) {
            debug!("discarding answer for a replaced document");
            return Err(PipelineError::Superseded);
        }
        inner.state = PipelineState::Ready;

        let (answer, sources) = result?;
        let record = QueryRecord::new(question.trim(), answer, &sources);
        inner.history.append(record.clone());

        Ok(AnswerReport {
            document,
            record,
            sources,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn answer(
        &self,
        index: &dyn Index,
        question: &str,
    ) -> Result<(String, Vec<crate::models::ScoredChunk>), PipelineError> {
        let sources = self.retriever.retrieve(index, question, self.top_k).await?;
        let passages: Vec<String> = sources.iter().map(|s| s.chunk.text.clone()).collect();
        let answer = self.synthesizer.synthesize(question.trim(), &passages).await?;
        Ok((answer, sources))
    }

    /// Retrieval only, without synthesis or history. Leaves the state untouched.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<RetrievalResults, PipelineError> {
        let index = {
            let inner = self.lock();
            match (&inner.index, inner.state) {
                (Some(index), PipelineState::Ready | PipelineState::Querying) => Arc::clone(index),
                (_, PipelineState::Empty) => return Err(PipelineError::EmptyIndex),
                (_, state) => return Err(PipelineError::NotReady { state }),
            }
        };
        self.retriever.retrieve_timed(index.as_ref(), question, k).await
    }

    /// Drop the document, its index and the history.
    pub async fn reset(&self) {
        let previous = {
            let mut inner = self.lock();
            self.generation.fetch_add(1, Ordering::SeqCst);
            std::mem::take(&mut *inner).index
        };
        release(previous).await;
    }

    /// Release backend resources before the session is dropped.
    pub async fn close(&self) {
        self.reset().await;
    }

    pub fn history(&self) -> History {
        self.lock().history.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.lock().state
    }

    pub fn document(&self) -> Option<DocumentInfo> {
        self.lock().document.clone()
    }

    pub fn embedder_name(&self) -> &str {
        self.embedder.name()
    }

    pub fn synthesizer_name(&self) -> &str {
        self.synthesizer.name()
    }
}

async fn release(index: Option<Arc<dyn Index>>) {
    if let Some(index) = index
        && let Err(e) = index.close().await
    {
        warn!(backend = index.backend(), error = %e, "failed to release index");
    }
}
