use anyhow::Result;

use crate::cli::output::{StatusInfo, get_formatter};
use crate::client::DaemonClient;
use crate::models::{Config, EmbeddingProviderKind, IndexDriver, OutputFormat};
use crate::services::create_index;

pub async fn handle_status(format: OutputFormat, verbose: bool) -> Result<()> {
    let config = Config::load()?.config;
    let formatter = get_formatter(format);

    let client = DaemonClient::new(&config);
    let daemon = if client.is_running() {
        client.status().await.ok()
    } else {
        None
    };

    let dimension = config.embedding.effective_dimension() as usize;
    let index_connected = match create_index(&config.index, dimension).await {
        Ok(index) => index.health_check().await.unwrap_or(false),
        Err(e) => {
            if verbose {
                eprintln!("Index backend: {e}");
            }
            false
        }
    };

    let embedding_model = match config.embedding.provider {
        EmbeddingProviderKind::OpenAi => config.embedding.model.clone(),
        EmbeddingProviderKind::Local => config.embedding.model_id.clone(),
    };

    let status = StatusInfo {
        embedding_provider: config.embedding.provider.to_string(),
        embedding_model,
        embedding_dimension: dimension,
        chat_model: config.llm.model.clone(),
        api_key_set: config.openai_api_key.is_some(),
        index_backend: config.index.driver.to_string(),
        index_url: (config.index.driver != IndexDriver::Memory).then(|| config.index.url.clone()),
        index_connected,
        daemon_running: daemon.is_some(),
        daemon_idle_secs: daemon.as_ref().map(|d| d.idle_secs),
        daemon_requests: daemon.as_ref().map(|d| d.requests_served),
        metrics: daemon.and_then(|d| d.metrics),
    };

    print!("{}", formatter.format_status(&status));

    let daemon_needed = config.embedding.provider == EmbeddingProviderKind::Local;
    if !status.api_key_set || !index_connected || (daemon_needed && !status.daemon_running) {
        eprintln!();
        if !status.api_key_set {
            eprintln!("Hint: set OPENAI_API_KEY in the environment or a .env file.");
        }
        if daemon_needed && !status.daemon_running {
            eprintln!("Hint: embedding daemon not running. It starts automatically on first use.");
            eprintln!("      Or start it manually with: docqa serve");
        }
        if !index_connected {
            match config.index.driver {
                IndexDriver::Memory => {}
                IndexDriver::Qdrant => {
                    eprintln!("Warning: Qdrant not reachable. Start with: docker compose up -d qdrant");
                }
                IndexDriver::PostgreSQL => {
                    eprintln!("Warning: PostgreSQL not accessible. Check connection settings.");
                }
            }
        }
    }

    Ok(())
}
