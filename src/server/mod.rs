//! Local embedding daemon.
//!
//! Loads the ONNX model once and serves embedding requests over a Unix socket until it
//! is told to stop, receives a signal, or sits idle past `daemon.idle_timeout_secs`.

pub mod embedding;
pub mod protocol;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{DaemonError, ModelError};
use crate::models::Config;
use crate::server::embedding::{EmbeddingModel, SharedEmbeddingModel};
use crate::server::protocol::{
    EmbedResponse, MAX_MESSAGE_BYTES, Request, Response, StatusResponse, decode_length,
    encode_message,
};
use crate::services::{MetricsStore, RequestKind};

pub struct DaemonServer {
    config: Config,
    socket_path: PathBuf,
    model: SharedEmbeddingModel,
    metrics: Option<Mutex<MetricsStore>>,
    started: Instant,
    last_request: RwLock<Instant>,
    requests_served: AtomicU64,
    shutdown: AtomicBool,
}

impl DaemonServer {
    pub fn new(config: Config) -> Result<Self, ModelError> {
        let model_dir = match config.embedding.model_path.clone() {
            Some(path) => path,
            None => Config::models_dir()
                .ok_or_else(|| {
                    ModelError::NotFound("could not determine models directory".to_string())
                })?
                .join(model_dir_name(&config.embedding.model_id)),
        };

        info!(model = %config.embedding.model_id, dir = %model_dir.display(), "loading embedding model");
        let model = Arc::new(EmbeddingModel::load(&config.embedding, &model_dir)?);

        let metrics = if config.metrics.enabled {
            open_metrics(config.metrics.retention_days).map(Mutex::new)
        } else {
            None
        };

        Ok(Self {
            socket_path: config.socket_path(),
            config,
            model,
            metrics,
            started: Instant::now(),
            last_request: RwLock::new(Instant::now()),
            requests_served: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        })
    }

    pub async fn run(&self) -> Result<(), DaemonError> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        std::fs::write(self.config.pid_path(), std::process::id().to_string())?;

        info!(
            socket = %self.socket_path.display(),
            idle_timeout_secs = self.config.daemon.idle_timeout_secs,
            "daemon listening"
        );

        let idle_timeout = Duration::from_secs(self.config.daemon.idle_timeout_secs);
        let check_interval = Duration::from_secs(5);
        let mut terminate = terminate_signal()?;

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, _)) => {
                        *self.last_request.write().await = Instant::now();
                        self.handle_connection(stream).await;
                        if self.shutdown.load(Ordering::Relaxed) {
                            info!("shutdown requested");
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                _ = tokio::time::sleep(check_interval) => {
                    if self.last_request.read().await.elapsed() > idle_timeout {
                        info!("idle timeout reached");
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received SIGINT");
                    break;
                }
                _ = terminate.recv() => {
                    info!("received SIGTERM");
                    break;
                }
            }
        }

        self.cleanup();
        Ok(())
    }

    async fn handle_connection(&self, mut stream: UnixStream) {
        let mut len_buf = [0u8; 4];

        while stream.read_exact(&mut len_buf).await.is_ok() {
            let len = decode_length(&len_buf);
            if len > MAX_MESSAGE_BYTES {
                warn!(len, "message too large, closing connection");
                break;
            }

            let mut msg_buf = vec![0u8; len];
            if stream.read_exact(&mut msg_buf).await.is_err() {
                break;
            }

            let response = match serde_json::from_slice::<Request>(&msg_buf) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => Response::error(format!("invalid request: {}", e)),
            };
            self.requests_served.fetch_add(1, Ordering::Relaxed);

            match encode_message(&response) {
                Ok(encoded) => {
                    if stream.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to encode response");
                    break;
                }
            }

            if matches!(response, Response::ShutdownAck) {
                break;
            }
        }
    }

    async fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::Shutdown => {
                self.shutdown.store(true, Ordering::Relaxed);
                Response::ShutdownAck
            }

            Request::Status => {
                let metrics = match &self.metrics {
                    Some(store) => Some(
                        store
                            .lock()
                            .await
                            .summary(self.config.metrics.retention_days),
                    ),
                    None => None,
                };
                Response::Status(StatusResponse {
                    pid: std::process::id(),
                    model_id: self.config.embedding.model_id.clone(),
                    dimension: self.model.dimension(),
                    uptime_secs: self.started.elapsed().as_secs(),
                    idle_secs: self.last_request.read().await.elapsed().as_secs(),
                    requests_served: self.requests_served.load(Ordering::Relaxed),
                    metrics,
                })
            }

            Request::Embed(req) => {
                let start = Instant::now();
                let count = req.texts.len();
                let kind = if req.is_query {
                    RequestKind::Query
                } else {
                    RequestKind::Passages
                };
                let model = Arc::clone(&self.model);
                let result = tokio::task::spawn_blocking(move || model.embed(&req.texts, req.is_query))
                    .await
                    .map_err(|e| ModelError::InferenceError(e.to_string()))
                    .and_then(|r| r);

                let latency_ms = start.elapsed().as_millis() as u64;
                debug!(texts = count, latency_ms, ok = result.is_ok(), "embed request");
                if let Some(store) = &self.metrics {
                    store.lock().await.record(kind, count, latency_ms, result.is_ok());
                }

                match result {
                    Ok(embeddings) => Response::Embed(EmbedResponse { embeddings }),
                    Err(e) => Response::error(e.to_string()),
                }
            }
        }
    }

    fn cleanup(&self) {
        let _ = std::fs::remove_file(&self.socket_path);
        let _ = std::fs::remove_file(self.config.pid_path());
        info!(
            requests = self.requests_served.load(Ordering::Relaxed),
            "daemon stopped"
        );
    }
}

fn open_metrics(retention_days: u32) -> Option<MetricsStore> {
    let path = Config::metrics_db_path()?;
    if let Some(parent) = path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        warn!(error = %e, "failed to create metrics directory");
        return None;
    }
    match MetricsStore::open(&path) {
        Ok(store) => {
            let removed = store.cleanup(retention_days);
            debug!(retention_days, removed, "metrics enabled");
            Some(store)
        }
        Err(e) => {
            warn!(error = %e, "failed to open metrics database");
            None
        }
    }
}

#[cfg(unix)]
fn terminate_signal() -> Result<tokio::signal::unix::Signal, DaemonError> {
    use tokio::signal::unix::{SignalKind, signal};
    Ok(signal(SignalKind::terminate())?)
}

/// `sentence-transformers/all-MiniLM-L6-v2` → `sentence-transformers--all-MiniLM-L6-v2`
pub fn model_dir_name(model_id: &str) -> String {
    model_id.replace('/', "--")
}

pub async fn run_daemon(config: Config) -> anyhow::Result<()> {
    let server = DaemonServer::new(config)?;
    server.run().await?;
    Ok(())
}
