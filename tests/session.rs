use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use docqa::error::{EmbeddingError, PipelineError, SynthesisError};
use docqa::models::{Config, Document, DocumentFormat};
use docqa::services::{AnswerSynthesizer, ChatSession, EmbeddingProvider, PipelineState};

/// Embeds text as counts of the letters A, B and C, with switchable outages.
#[derive(Default)]
struct LetterCounts {
    fail_queries: AtomicBool,
    fail_batches: AtomicBool,
}

fn letter_vector(text: &str) -> Vec<f32> {
    let count = |c: char| text.chars().filter(|&x| x == c).count() as f32;
    vec![count('A') + 0.01, count('B'), count('C')]
}

#[async_trait]
impl EmbeddingProvider for LetterCounts {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(EmbeddingError::ConnectionError("connection refused".into()));
        }
        Ok(letter_vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Timeout);
        }
        Ok(texts.iter().map(|t| letter_vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        3
    }

    fn name(&self) -> &str {
        "letter-counts"
    }
}

/// Counts batch embedding calls.
#[derive(Default)]
struct Counting {
    batches: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for Counting {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(letter_vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| letter_vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        3
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// Remembers the passages it was given and answers with the first one.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Vec<String>>>,
    fail: AtomicBool,
}

#[async_trait]
impl AnswerSynthesizer for Recorder {
    async fn synthesize(&self, _question: &str, passages: &[String]) -> Result<String, SynthesisError> {
        self.seen.lock().unwrap().push(passages.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(SynthesisError::ServerError("status 500: boom".into()));
        }
        Ok(passages.first().cloned().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "recorder"
    }
}

/// Holds every answer until released.
#[derive(Default)]
struct Gated {
    release: Notify,
}

#[async_trait]
impl AnswerSynthesizer for Gated {
    async fn synthesize(&self, _question: &str, _passages: &[String]) -> Result<String, SynthesisError> {
        self.release.notified().await;
        Ok("late answer".to_string())
    }

    fn name(&self) -> &str {
        "gated"
    }
}

fn config(chunk_size: u32, overlap: u32) -> Config {
    let mut config = Config::default();
    config.chunking.chunk_size = chunk_size;
    config.chunking.chunk_overlap = overlap;
    config
}

fn text(body: &str) -> Document {
    Document::new("notes.txt", DocumentFormat::Text, body.as_bytes().to_vec())
}

#[tokio::test]
async fn synthesizer_receives_chunks_in_retrieval_order() {
    let recorder = Arc::new(Recorder::default());
    let session = ChatSession::new(&config(5, 0), Arc::new(LetterCounts::default()), recorder.clone())
        .unwrap()
        .with_top_k(3);

    session.load_document(text("AAAAABBBBBCCCCCCCCCC")).await.unwrap();
    let report = session.ask_with_sources("CCCCB").await.unwrap();

    let retrieved: Vec<String> = report.sources.iter().map(|s| s.chunk.text.clone()).collect();
    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], retrieved);
    assert_eq!(report.record.retrieved_chunk_ids, vec![2, 3, 1]);
    assert!(report.sources.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn top_k_larger_than_document_returns_every_chunk() {
    let recorder = Arc::new(Recorder::default());
    let session = ChatSession::new(&config(5, 0), Arc::new(LetterCounts::default()), recorder.clone())
        .unwrap()
        .with_top_k(3);

    session.load_document(text("AAAAABBBBB")).await.unwrap();
    let record = session.ask("A?").await.unwrap();
    assert_eq!(record.retrieved_chunk_ids.len(), 2);
    assert_eq!(recorder.seen.lock().unwrap()[0].len(), 2);
}

#[tokio::test]
async fn failed_build_leaves_nothing_searchable() {
    let embedder = Arc::new(LetterCounts::default());
    let session = ChatSession::new(&config(5, 0), embedder.clone(), Arc::new(Recorder::default())).unwrap();

    session.load_document(text("AAAAABBBBB")).await.unwrap();
    assert_eq!(session.state(), PipelineState::Ready);

    embedder.fail_batches.store(true, Ordering::SeqCst);
    let result = session.load_document(text("CCCCCCCCCC")).await;
    assert!(matches!(result, Err(PipelineError::IndexBuild(_))));
    assert_eq!(session.state(), PipelineState::Empty);
    assert!(session.document().is_none());

    assert!(matches!(session.ask("A?").await, Err(PipelineError::EmptyIndex)));
    assert!(matches!(session.retrieve("A?", 2).await, Err(PipelineError::EmptyIndex)));
}

#[tokio::test]
async fn failed_queries_are_not_recorded() {
    let embedder = Arc::new(LetterCounts::default());
    let recorder = Arc::new(Recorder::default());
    let session = ChatSession::new(&config(5, 0), embedder.clone(), recorder.clone()).unwrap();

    session.load_document(text("AAAAABBBBB")).await.unwrap();
    session.ask("first").await.unwrap();

    recorder.fail.store(true, Ordering::SeqCst);
    assert!(matches!(session.ask("second").await, Err(PipelineError::Synthesis(_))));
    assert_eq!(session.state(), PipelineState::Ready);

    recorder.fail.store(false, Ordering::SeqCst);
    embedder.fail_queries.store(true, Ordering::SeqCst);
    let err = session.ask("third").await.unwrap_err();
    assert!(matches!(err, PipelineError::EmbeddingUnavailable(_)));
    assert!(!err.is_terminal());
    assert_eq!(session.state(), PipelineState::Ready);

    let history = session.history();
    let questions: Vec<&str> = history.iter().map(|r| r.question.as_str()).collect();
    assert_eq!(questions, vec!["first"]);

    embedder.fail_queries.store(false, Ordering::SeqCst);
    session.ask("fourth").await.unwrap();
    assert_eq!(session.history().len(), 2);
}

#[tokio::test]
async fn history_is_chronological_and_restartable() {
    let session = ChatSession::new(
        &config(5, 0),
        Arc::new(LetterCounts::default()),
        Arc::new(Recorder::default()),
    )
    .unwrap();
    session.load_document(text("AAAAABBBBBCCCCC")).await.unwrap();

    for question in ["A?", "B?", "C?"] {
        session.ask(question).await.unwrap();
    }

    let history = session.history();
    let first: Vec<&str> = history.iter().map(|r| r.question.as_str()).collect();
    let second: Vec<&str> = (&history).into_iter().map(|r| r.question.as_str()).collect();
    assert_eq!(first, vec!["A?", "B?", "C?"]);
    assert_eq!(first, second);

    session.reset().await;
    assert!(session.history().is_empty());
    assert_eq!(session.state(), PipelineState::Empty);
}

#[tokio::test]
async fn replacing_the_document_discards_the_pending_answer() {
    let gated = Arc::new(Gated::default());
    let session = Arc::new(
        ChatSession::new(&config(5, 0), Arc::new(LetterCounts::default()), gated.clone()).unwrap(),
    );
    session.load_document(text("AAAAABBBBB")).await.unwrap();

    let pending = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.ask("A?").await })
    };
    while session.state() != PipelineState::Querying {
        tokio::task::yield_now().await;
    }

    assert!(matches!(
        session.ask("again?").await,
        Err(PipelineError::NotReady {
            state: PipelineState::Querying
        })
    ));

    let info = session.load_document(text("CCCCC")).await.unwrap();
    gated.release.notify_one();

    let stale = pending.await.unwrap();
    assert!(matches!(stale, Err(PipelineError::Superseded)));

    assert_eq!(session.state(), PipelineState::Ready);
    assert!(session.history().is_empty());
    assert_eq!(session.document().unwrap().id, info.id);
}

#[tokio::test]
async fn blank_documents_are_rejected_before_indexing() {
    let embedder = Arc::new(Counting::default());
    let session = ChatSession::new(&config(5, 0), embedder.clone(), Arc::new(Recorder::default())).unwrap();

    for body in ["", "  \n\t"] {
        let result = session.load_document(text(body)).await;
        assert!(matches!(result, Err(PipelineError::EmptyDocument)), "{body:?}");
        assert_eq!(session.state(), PipelineState::Empty);
    }
    assert_eq!(embedder.batches.load(Ordering::SeqCst), 0);

    session.load_document(text("AAAAA")).await.unwrap();
    assert_eq!(embedder.batches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reset_discards_the_pending_answer() {
    let gated = Arc::new(Gated::default());
    let session = Arc::new(
        ChatSession::new(&config(5, 0), Arc::new(LetterCounts::default()), gated.clone()).unwrap(),
    );
    session.load_document(text("AAAAABBBBB")).await.unwrap();

    let pending = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.ask("A?").await })
    };
    while session.state() != PipelineState::Querying {
        tokio::task::yield_now().await;
    }

    session.reset().await;
    gated.release.notify_one();

    assert!(matches!(pending.await.unwrap(), Err(PipelineError::Superseded)));
    assert_eq!(session.state(), PipelineState::Empty);
    assert!(session.history().is_empty());
    assert!(matches!(session.ask("A?").await, Err(PipelineError::EmptyIndex)));

    session.load_document(text("AAAAA")).await.unwrap();
    assert_eq!(session.state(), PipelineState::Ready);
}
