//! Command-line interface for docqa.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use crate::models::OutputFormat;

/// Ask questions about a PDF or text document and get answers grounded in its contents.
#[derive(Debug, Parser)]
#[command(name = "docqa")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        long,
        short = 'f',
        global = true,
        help = "Output format: text, json, or markdown"
    )]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Answer a single question about a document
    Ask(commands::AskArgs),

    /// Start an interactive question-and-answer session
    Chat(commands::ChatArgs),

    /// Show the chunks that would be used to answer a question
    Retrieve(commands::RetrieveArgs),

    /// Check providers, index backend and the local embedding daemon
    Status,

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),

    /// Run or stop the local embedding daemon
    Serve(commands::ServeArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask() {
        let cli = Cli::parse_from(["docqa", "-f", "json", "ask", "lease.pdf", "When does it end?", "-k", "6"]);
        assert_eq!(cli.format, Some(OutputFormat::Json));
        match cli.command {
            Commands::Ask(args) => {
                assert_eq!(args.file.to_str(), Some("lease.pdf"));
                assert_eq!(args.question, "When does it end?");
                assert_eq!(args.top_k, Some(6));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_chat_without_file() {
        let cli = Cli::parse_from(["docqa", "chat"]);
        assert!(matches!(cli.command, Commands::Chat(ref args) if args.file.is_none()));
    }

    #[test]
    fn test_parse_serve_stop() {
        let cli = Cli::parse_from(["docqa", "serve", "stop"]);
        assert!(matches!(
            cli.command,
            Commands::Serve(commands::ServeArgs {
                command: Some(commands::ServeCommand::Stop),
                ..
            })
        ));
    }
}
