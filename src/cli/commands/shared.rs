use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::output::error_hint;
use crate::error::{AppError, PipelineError};
use crate::models::{Config, DocumentInfo};
use crate::services::{ChatSession, OpenAiSynthesizer, create_provider};
use crate::utils::read_document;

/// Session wired to the configured embedding provider and chat model.
pub fn build_session(config: &Config, top_k: Option<usize>) -> Result<ChatSession, AppError> {
    if top_k == Some(0) {
        return Err(AppError::Other("top-k must be at least 1".to_string()));
    }

    let embedder = create_provider(config)?;
    let api_key = config.require_openai_key()?;
    let synthesizer = OpenAiSynthesizer::new(&config.llm, api_key)?;

    let session = ChatSession::new(config, embedder, Arc::new(synthesizer))
        .map_err(PipelineError::from)?;
    Ok(match top_k {
        Some(k) => session.with_top_k(k),
        None => session,
    })
}

/// Read `path` and index it into `session`, with a spinner on stderr while it runs.
pub async fn load_file(
    session: &ChatSession,
    config: &Config,
    path: &Path,
    show_progress: bool,
) -> Result<DocumentInfo, PipelineError> {
    let document = read_document(path, config.chunking.max_document_bytes)?;

    let spinner = show_progress.then(|| {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
            pb.set_style(style);
        }
        pb.set_message(format!("Indexing {}", document.name));
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    });

    let result = session.load_document(document).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    result
}

/// Print the hint for `err` on stderr, then hand it back for propagation.
pub fn with_hint(err: PipelineError) -> anyhow::Error {
    if let Some(hint) = error_hint(&err) {
        eprintln!("Hint: {}", hint);
    }
    err.into()
}
