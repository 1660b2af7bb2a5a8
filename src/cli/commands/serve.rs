use std::time::Duration;

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::client::{DaemonClient, spawn_daemon, stop_daemon};
use crate::error::DaemonError;
use crate::models::Config;
use crate::server::run_daemon;

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[command(subcommand)]
    pub command: Option<ServeCommand>,

    /// Run in this process instead of detaching
    #[arg(long, hide = true)]
    pub foreground: bool,
}

#[derive(Debug, Subcommand)]
pub enum ServeCommand {
    /// Stop the running daemon
    Stop,
    /// Stop the daemon and start a new one
    Restart,
}

pub async fn handle_serve(args: ServeArgs) -> Result<()> {
    let config = Config::load()?.config;

    if args.foreground {
        eprintln!("Starting embedding daemon in foreground mode...");
        return run_daemon(config).await;
    }

    match args.command {
        Some(ServeCommand::Stop) => handle_stop(&config),
        Some(ServeCommand::Restart) => handle_restart(&config).await,
        None => handle_start(&config),
    }
}

fn handle_start(config: &Config) -> Result<()> {
    let client = DaemonClient::new(config);

    if client.is_running() {
        println!("Daemon is already running");
        return Ok(());
    }

    spawn_daemon()?;

    println!("Daemon started");
    println!("Socket: {}", config.socket_path().display());
    Ok(())
}

fn handle_stop(config: &Config) -> Result<()> {
    match stop_daemon(config) {
        Ok(()) => {
            println!("Daemon stopped");
            Ok(())
        }
        Err(DaemonError::NotRunning) => {
            println!("Daemon is not running");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn handle_restart(config: &Config) -> Result<()> {
    match stop_daemon(config) {
        Ok(()) | Err(DaemonError::NotRunning) => {}
        Err(e) => return Err(e.into()),
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    handle_start(config)
}
