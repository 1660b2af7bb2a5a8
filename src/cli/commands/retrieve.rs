use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use super::shared::with_hint;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::{ChatSession, RetrievalOnly, create_provider};
use crate::utils::read_document;

#[derive(Debug, Args)]
pub struct RetrieveArgs {
    #[arg(required = true, help = "PDF or text document to search")]
    pub file: PathBuf,

    #[arg(required = true, help = "Question or search text")]
    pub query: String,

    #[arg(long = "top-k", short = 'k', help = "Number of chunks to return")]
    pub top_k: Option<usize>,
}

/// Index the document and print the best-matching chunks without generating an answer.
pub async fn handle_retrieve(args: RetrieveArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let query = args.query.trim();
    if query.is_empty() {
        anyhow::bail!("query cannot be empty");
    }

    let config = Config::load()?.config;
    let formatter = get_formatter(format);

    let k = args.top_k.unwrap_or(config.retrieval.top_k as usize);
    if k == 0 {
        anyhow::bail!("top-k must be at least 1");
    }

    let embedder = create_provider(&config).context("failed to set up embedding provider")?;
    let session = ChatSession::new(&config, embedder, Arc::new(RetrievalOnly))?;

    let document = read_document(&args.file, config.chunking.max_document_bytes)?;
    let info = session.load_document(document).await.map_err(with_hint)?;

    if verbose {
        eprintln!("Query: \"{query}\"");
        eprintln!("  Document: {} ({} chunks)", info.name, info.chunks);
        eprintln!("  Top-k: {k}");
        eprintln!("  Embeddings: {}", session.embedder_name());
    }

    let results = session.retrieve(query, k).await;
    session.close().await;
    let results = results.map_err(with_hint)?;
    print!("{}", formatter.format_retrieval(&results));

    Ok(())
}
