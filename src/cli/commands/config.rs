use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::cli::output::{Formatter, get_formatter};
use crate::models::{Config, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Initialize configuration file")]
    Init {
        #[arg(
            long,
            short = 'g',
            help = "Create global config instead of project config"
        )]
        global: bool,
        #[arg(long, help = "Force overwrite existing config")]
        force: bool,
    },
    #[command(about = "Show current configuration")]
    Show {
        #[arg(long, help = "Show which files the configuration was loaded from")]
        source: bool,
    },
    #[command(about = "Show configuration file paths")]
    Path {
        #[arg(long, help = "Show all possible config paths")]
        all: bool,
    },
    #[command(about = "Edit configuration file")]
    Edit {
        #[arg(
            long,
            short = 'g',
            help = "Edit global config instead of project config"
        )]
        global: bool,
    },
}

pub async fn handle_config(cmd: ConfigCommand, format: OutputFormat, _verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);

    match cmd {
        ConfigCommand::Init { global, force } => handle_init(global, force, formatter.as_ref()),
        ConfigCommand::Show { source } => handle_show(source, format),
        ConfigCommand::Path { all } => handle_path(all),
        ConfigCommand::Edit { global } => handle_edit(global, formatter.as_ref()),
    }
}

/// The global file, or the project file: the nearest existing one when `nearest` is set,
/// otherwise the one in the current directory.
fn target_path(global: bool, nearest: bool) -> Result<(&'static str, PathBuf)> {
    if global {
        let path = Config::global_path()
            .ok_or_else(|| anyhow::anyhow!("could not determine home directory"))?;
        return Ok(("global", path));
    }
    let path = nearest
        .then(Config::find_project_config)
        .flatten()
        .or_else(|| Config::project_config_dir().map(|dir| dir.join("config.toml")))
        .ok_or_else(|| anyhow::anyhow!("could not determine project directory"))?;
    Ok(("project", path))
}

fn create_config(global: bool) -> Result<PathBuf> {
    let created = if global {
        Config::init_global()
    } else {
        Config::init_project()
    };
    created.with_context(|| {
        format!(
            "failed to create {} config",
            if global { "global" } else { "project" }
        )
    })
}

fn handle_init(global: bool, force: bool, formatter: &dyn Formatter) -> Result<()> {
    let (scope, target) = target_path(global, false)?;
    if target.exists() && !force {
        anyhow::bail!(
            "{} config already exists at: {}\nUse --force to overwrite.",
            scope,
            target.display()
        );
    }

    let path = create_config(global)?;
    print!(
        "{}",
        formatter.format_message(&format!("Created {} config at: {}", scope, path.display()))
    );
    Ok(())
}

fn handle_show(show_source: bool, format: OutputFormat) -> Result<()> {
    let resolved = Config::load()?;

    if format == OutputFormat::Json {
        let output = if show_source {
            serde_json::json!({
                "config": resolved.config,
                "project_path": resolved.project_path,
                "global_path": resolved.global_path,
                "openai_api_key_set": resolved.config.openai_api_key.is_some(),
            })
        } else {
            serde_json::to_value(&resolved.config)?
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if show_source {
        match resolved.project_path {
            Some(ref path) => println!("# Project config: {}", path.display()),
            None => println!("# Project config: (none)"),
        }
        match resolved.global_path {
            Some(ref path) => println!("# Global config: {}", path.display()),
            None => println!("# Global config: (none)"),
        }
        println!("# Values not set in either file are defaults; environment variables apply last.");
        println!();
    }

    print!("{}", toml::to_string_pretty(&resolved.config)?);

    println!();
    let key = if resolved.config.openai_api_key.is_some() {
        "********"
    } else {
        "(not set)"
    };
    println!("# OPENAI_API_KEY = {}", key);
    println!("# socket_path = \"{}\"", resolved.config.socket_path().display());

    Ok(())
}

fn handle_path(show_all: bool) -> Result<()> {
    let mut rows: Vec<(&str, PathBuf, bool)> = Vec::new();

    match Config::find_project_config() {
        Some(path) => rows.push(("Project config", path, true)),
        None => {
            if let Some(dir) = Config::project_config_dir() {
                rows.push(("Project config", dir.join("config.toml"), false));
            }
        }
    }
    if let Some(path) = Config::global_path() {
        let exists = path.exists();
        rows.push(("Global config", path, exists));
    }
    if let Ok(cwd) = std::env::current_dir() {
        let path = cwd.join(".env");
        let exists = path.exists();
        rows.push((".env file", path, exists));
    }

    println!("Configuration paths:");
    println!();
    for (label, path, exists) in rows {
        if exists {
            println!("{} (active): {}", label, path.display());
        } else if show_all {
            println!("{} (would be): {}", label, path.display());
        }
    }

    if show_all {
        if let Some(models) = Config::models_dir() {
            println!("Models directory: {}", models.display());
        }
        if let Some(metrics) = Config::metrics_db_path() {
            println!("Metrics database: {}", metrics.display());
        }
    }

    Ok(())
}

fn handle_edit(global: bool, formatter: &dyn Formatter) -> Result<()> {
    let (scope, config_path) = target_path(global, true)?;
    if !config_path.exists() {
        let path = create_config(global)?;
        print!(
            "{}",
            formatter.format_message(&format!("Created {} config at: {}", scope, path.display()))
        );
    }

    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| "vi".into());

    let status = Command::new(&editor)
        .arg(&config_path)
        .status()
        .with_context(|| format!("failed to open editor: {}", editor))?;
    if !status.success() {
        anyhow::bail!("editor exited with {}", status);
    }

    Config::load_from(Some(&config_path), None)
        .and_then(|resolved| resolved.config.validate())
        .with_context(|| format!("{} is not a valid configuration", config_path.display()))?;

    Ok(())
}
