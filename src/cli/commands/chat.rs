use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::shared::{build_session, load_file};
use crate::cli::output::{Formatter, SessionInfo, error_hint, get_formatter};
use crate::error::PipelineError;
use crate::models::{Config, OutputFormat};
use crate::services::ChatSession;

const HELP: &str = "\
Type a question to ask about the open document.

  /open <file>   index a PDF or text file (replaces the current document)
  /history       show questions and answers so far
  /status        show the session state
  /reset         close the document and clear the history
  /help          show this message
  /quit          leave the session";

#[derive(Debug, Args)]
pub struct ChatArgs {
    #[arg(help = "Document to open when the session starts")]
    pub file: Option<PathBuf>,

    #[arg(long = "top-k", short = 'k', help = "Number of chunks to answer from")]
    pub top_k: Option<usize>,
}

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Question(&'a str),
    Open(&'a str),
    History,
    Status,
    Reset,
    Help,
    Quit,
    Unknown(&'a str),
    Blank,
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Blank;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Question(line);
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(n, r)| (n, r.trim()))
        .unwrap_or((command, ""));

    match name {
        "open" | "load" => Input::Open(rest),
        "history" => Input::History,
        "status" => Input::Status,
        "reset" | "clear" => Input::Reset,
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        _ => Input::Unknown(name),
    }
}

/// Extra notice for errors that closed the document, so the user knows to open one again.
fn closed_notice(err: &PipelineError) -> Option<&'static str> {
    err.is_terminal()
        .then_some("No document is open now; use /open <file> to continue.")
}

struct Repl<'a> {
    session: ChatSession,
    config: &'a Config,
    formatter: Box<dyn Formatter>,
    interactive: bool,
}

impl Repl<'_> {
    fn report(&self, err: &PipelineError) {
        print!("{}", self.formatter.format_error(&err.to_string()));
        if let Some(hint) = error_hint(err) {
            eprintln!("{}", style(hint).dim());
        }
        if let Some(notice) = closed_notice(err) {
            eprintln!("{}", style(notice).yellow());
        }
    }

    async fn open(&self, path: &str) {
        if path.is_empty() {
            print!("{}", self.formatter.format_error("usage: /open <file>"));
            return;
        }
        match load_file(&self.session, self.config, Path::new(path), self.interactive).await {
            Ok(info) => print!("{}", self.formatter.format_document(&info)),
            Err(e) => self.report(&e),
        }
    }

    async fn ask(&self, question: &str) {
        match self.session.ask_with_sources(question).await {
            Ok(report) => print!("{}", self.formatter.format_answer(&report)),
            Err(e) => self.report(&e),
        }
    }

    fn status(&self) {
        let info = SessionInfo {
            state: self.session.state(),
            document: self.session.document(),
            questions: self.session.history().len(),
            top_k: self.session.top_k(),
        };
        print!("{}", self.formatter.format_session(&info));
    }

    async fn run(&self, interactive: bool) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            if interactive {
                print!("{} ", style(">").cyan().bold());
                std::io::stdout().flush()?;
            }

            let Some(line) = lines.next_line().await? else {
                return Ok(());
            };
            if !self.handle(&line).await {
                return Ok(());
            }
        }
    }

    /// Returns false once the user asks to leave.
    async fn handle(&self, line: &str) -> bool {
        match parse_input(line) {
            Input::Blank => {}
            Input::Question(question) => self.ask(question).await,
            Input::Open(path) => self.open(path).await,
            Input::History => print!("{}", self.formatter.format_history(&self.session.history())),
            Input::Status => self.status(),
            Input::Reset => {
                self.session.reset().await;
                print!("{}", self.formatter.format_message("Session cleared."));
            }
            Input::Help => println!("{}", HELP),
            Input::Quit => return false,
            Input::Unknown(name) => {
                print!(
                    "{}",
                    self.formatter
                        .format_error(&format!("unknown command /{} (try /help)", name))
                );
            }
        }
        true
    }
}

pub async fn handle_chat(args: ChatArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let config = Config::load()?.config;
    let session = build_session(&config, args.top_k)?;
    let interactive = console::user_attended() && format == OutputFormat::Text;

    let repl = Repl {
        session,
        config: &config,
        formatter: get_formatter(format),
        interactive,
    };

    if verbose {
        eprintln!("Embeddings: {}", repl.session.embedder_name());
        eprintln!("Chat model: {}", repl.session.synthesizer_name());
        eprintln!("Top-k: {}", repl.session.top_k());
    }

    if interactive {
        println!("{}", style("docqa chat").bold());
        println!("{}", style("Type /help for commands, /quit to leave.").dim());
    }

    if let Some(ref file) = args.file {
        repl.open(&file.to_string_lossy()).await;
    }

    let outcome = repl.run(interactive).await;
    repl.session.close().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_questions() {
        assert_eq!(parse_input("  What is the term? "), Input::Question("What is the term?"));
        assert_eq!(parse_input("   "), Input::Blank);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_input("/open  docs/lease.pdf "), Input::Open("docs/lease.pdf"));
        assert_eq!(parse_input("/open"), Input::Open(""));
        assert_eq!(parse_input("/history"), Input::History);
        assert_eq!(parse_input("/status"), Input::Status);
        assert_eq!(parse_input("/reset"), Input::Reset);
        assert_eq!(parse_input("/exit"), Input::Quit);
        assert_eq!(parse_input("/?"), Input::Help);
        assert_eq!(parse_input("/frobnicate now"), Input::Unknown("frobnicate"));
    }

    #[test]
    fn test_closed_notice_only_for_terminal_errors() {
        assert!(closed_notice(&PipelineError::EmptyDocument).is_some());
        assert!(closed_notice(&PipelineError::IndexBuild("upsert failed".into())).is_some());
        assert!(closed_notice(&PipelineError::EmptyIndex).is_none());
        assert!(closed_notice(&PipelineError::Superseded).is_none());
    }
}
