pub mod cli;
pub mod client;
pub mod error;
pub mod models;
pub mod server;
pub mod services;
pub mod utils;

pub use cli::{Cli, Commands};
pub use error::{AppError, PipelineError};
pub use models::{Config, OutputFormat};
pub use services::{ChatSession, History, PipelineState};
