use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::shared::{build_session, load_file, with_hint};
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};

#[derive(Debug, Args)]
pub struct AskArgs {
    #[arg(required = true, help = "PDF or text document to ask about")]
    pub file: PathBuf,

    #[arg(required = true, help = "Question to answer from the document")]
    pub question: String,

    #[arg(long = "top-k", short = 'k', help = "Number of chunks to answer from")]
    pub top_k: Option<usize>,
}

pub async fn handle_ask(args: AskArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let question = args.question.trim();
    if question.is_empty() {
        anyhow::bail!("question cannot be empty");
    }

    let config = Config::load()?.config;
    let formatter = get_formatter(format);
    let session = build_session(&config, args.top_k)?;

    let show_progress = format == OutputFormat::Text && console::user_attended_stderr();
    let info = load_file(&session, &config, &args.file, show_progress)
        .await
        .map_err(with_hint)?;

    if verbose {
        eprintln!(
            "Indexed {} ({} pages, {} chunks) with {}",
            info.name,
            info.pages,
            info.chunks,
            session.embedder_name()
        );
        eprintln!("  Top-k: {}", session.top_k());
    }

    let report = session.ask_with_sources(question).await;
    session.close().await;
    let report = report.map_err(with_hint)?;
    print!("{}", formatter.format_answer(&report));

    if verbose {
        eprintln!("\nAnswered by {} in {}ms", session.synthesizer_name(), report.duration_ms);
    }

    Ok(())
}
