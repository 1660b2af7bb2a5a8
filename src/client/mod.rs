//! Client side of the embedding daemon protocol.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, info};

use crate::error::DaemonError;
use crate::models::Config;
use crate::server::protocol::{
    EmbedRequest, MAX_MESSAGE_BYTES, Request, Response, StatusResponse, decode_length,
    encode_message,
};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
    auto_start: bool,
}

impl DaemonClient {
    pub fn new(config: &Config) -> Self {
        Self {
            socket_path: config.socket_path(),
            auto_start: config.daemon.auto_start,
        }
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    pub fn is_running(&self) -> bool {
        self.socket_path.exists()
            && std::os::unix::net::UnixStream::connect(&self.socket_path).is_ok()
    }

    /// Start the daemon in the background unless it is already up or auto-start is off.
    pub async fn ensure_running(&self) -> Result<(), DaemonError> {
        if self.is_running() {
            return Ok(());
        }
        if !self.auto_start {
            return Err(DaemonError::NotRunning);
        }

        info!("starting embedding daemon");
        spawn_daemon()?;
        self.wait_for_ready().await
    }

    async fn wait_for_ready(&self) -> Result<(), DaemonError> {
        let start = Instant::now();
        while start.elapsed() < STARTUP_TIMEOUT {
            if self.is_running() && self.ping().await.is_ok() {
                debug!(elapsed_ms = start.elapsed().as_millis() as u64, "daemon ready");
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Err(DaemonError::Timeout)
    }

    async fn send_request(&self, request: Request) -> Result<Response, DaemonError> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| DaemonError::ConnectionFailed(e.to_string()))?;

        let encoded =
            encode_message(&request).map_err(|e| DaemonError::ProtocolError(e.to_string()))?;
        stream
            .write_all(&encoded)
            .await
            .map_err(|e| DaemonError::SocketError(e.to_string()))?;

        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| DaemonError::SocketError(e.to_string()))?;

        let len = decode_length(&len_buf);
        if len > MAX_MESSAGE_BYTES {
            return Err(DaemonError::ProtocolError(format!(
                "response of {} bytes exceeds limit",
                len
            )));
        }

        let mut msg_buf = vec![0u8; len];
        stream
            .read_exact(&mut msg_buf)
            .await
            .map_err(|e| DaemonError::SocketError(e.to_string()))?;

        match serde_json::from_slice(&msg_buf) {
            Ok(Response::Error(e)) => Err(DaemonError::ProtocolError(e.message)),
            Ok(response) => Ok(response),
            Err(e) => Err(DaemonError::ProtocolError(e.to_string())),
        }
    }

    pub async fn ping(&self) -> Result<(), DaemonError> {
        match self.send_request(Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn status(&self) -> Result<StatusResponse, DaemonError> {
        match self.send_request(Request::Status).await? {
            Response::Status(s) => Ok(s),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn shutdown(&self) -> Result<(), DaemonError> {
        match self.send_request(Request::Shutdown).await? {
            Response::ShutdownAck => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn embed(&self, texts: Vec<String>, is_query: bool) -> Result<Vec<Vec<f32>>, DaemonError> {
        self.ensure_running().await?;

        let expected = texts.len();
        match self
            .send_request(Request::Embed(EmbedRequest { texts, is_query }))
            .await?
        {
            Response::Embed(r) if r.embeddings.len() == expected => Ok(r.embeddings),
            Response::Embed(r) => Err(DaemonError::ProtocolError(format!(
                "expected {} embeddings, got {}",
                expected,
                r.embeddings.len()
            ))),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &Response) -> DaemonError {
    DaemonError::ProtocolError(format!("unexpected response: {:?}", response))
}

/// Launch `docqa serve --foreground` detached from this process.
pub fn spawn_daemon() -> Result<(), DaemonError> {
    let exe = std::env::current_exe().map_err(|e| DaemonError::SpawnError(e.to_string()))?;

    Command::new(&exe)
        .args(["serve", "--foreground"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| DaemonError::SpawnError(e.to_string()))?;
    Ok(())
}

/// Send SIGTERM to the daemon recorded in the pid file and remove its runtime files.
pub fn stop_daemon(config: &Config) -> Result<(), DaemonError> {
    let pid_path = config.pid_path();
    if !pid_path.exists() {
        return Err(DaemonError::NotRunning);
    }

    let pid: i32 = std::fs::read_to_string(&pid_path)?
        .trim()
        .parse()
        .map_err(|_| DaemonError::ProtocolError("invalid pid file".to_string()))?;

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(DaemonError::SocketError(e.to_string())),
        }
    }

    let _ = std::fs::remove_file(&pid_path);
    let _ = std::fs::remove_file(config.socket_path());
    Ok(())
}
