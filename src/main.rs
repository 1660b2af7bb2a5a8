use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use docqa::cli::commands::{
    handle_ask, handle_chat, handle_config, handle_retrieve, handle_serve, handle_status,
};
use docqa::cli::{Cli, Commands};
use docqa::models::{Config, OutputFormat};

/// Detect ONNX Runtime library path and set ORT_DYLIB_PATH if not already set.
/// Must be called before any ort code runs.
fn detect_and_set_ort_path() {
    if std::env::var("ORT_DYLIB_PATH")
        .map(|p| Path::new(&p).exists())
        .unwrap_or(false)
    {
        return;
    }

    let home = std::env::var("HOME").unwrap_or_default();

    let candidates: Vec<String> = if cfg!(target_os = "macos") {
        vec![
            format!("{home}/.local/lib/docqa/libonnxruntime.dylib"),
            "/opt/homebrew/opt/onnxruntime/lib/libonnxruntime.dylib".into(),
            "/usr/local/opt/onnxruntime/lib/libonnxruntime.dylib".into(),
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            format!("{home}/.local/lib/docqa/libonnxruntime.so"),
            "/usr/lib/libonnxruntime.so".into(),
            "/usr/local/lib/libonnxruntime.so".into(),
            "/usr/lib/x86_64-linux-gnu/libonnxruntime.so".into(),
            "/usr/lib/aarch64-linux-gnu/libonnxruntime.so".into(),
        ]
    } else {
        Vec::new()
    };

    if let Some(path) = candidates.into_iter().find(|p| Path::new(p).exists()) {
        // SAFETY: Called at program start before any threads are spawned.
        unsafe {
            std::env::set_var("ORT_DYLIB_PATH", path);
        }
    }
}

/// Logs go to stderr so they never mix with answers on stdout.
/// `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "docqa=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .try_init();
}

fn main() -> Result<()> {
    detect_and_set_ort_path();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let format = match cli.format {
        Some(format) => format,
        None => Config::load()
            .map(|resolved| resolved.config.retrieval.default_format)
            .unwrap_or_default(),
    };
    let verbose = cli.verbose;

    match cli.command {
        // The daemon installs its own signal handlers so it can clean up its socket.
        Commands::Serve(args) => handle_serve(args).await,
        command => {
            tokio::select! {
                result = run_command(command, format, verbose) => result,
                _ = shutdown_signal() => {
                    eprintln!("\nReceived shutdown signal, cleaning up...");
                    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
                    Ok(())
                }
            }
        }
    }
}

async fn run_command(command: Commands, format: OutputFormat, verbose: bool) -> Result<()> {
    match command {
        Commands::Ask(args) => handle_ask(args, format, verbose).await,
        Commands::Chat(args) => handle_chat(args, format, verbose).await,
        Commands::Retrieve(args) => handle_retrieve(args, format, verbose).await,
        Commands::Status => handle_status(format, verbose).await,
        Commands::Config(cmd) => handle_config(cmd, format, verbose).await,
        Commands::Serve(args) => handle_serve(args).await,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
