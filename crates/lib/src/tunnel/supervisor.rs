//! Tunnel supervisor: spawn the tunnel binary, scan its combined output for the public URL, publish it once.
//!
//! stdout and stderr are read by two small forwarder tasks into one line channel; a scanner task
//! logs every line and matches until the first hit. The child is killed on `shutdown` (and on drop).

use crate::tunnel::endpoint::{EndpointCell, EndpointMatcher, TunnelEndpoint};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const LINE_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel binary not found: {binary} (is it installed and on PATH?)")]
    NotFound { binary: String },

    #[error("failed to start tunnel binary {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
}

/// How endpoint discovery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Endpoint found and published.
    Published(TunnelEndpoint),
    /// Output ended (process exited) before any line matched.
    Exhausted,
    /// The configured discovery timeout elapsed first.
    TimedOut,
}

/// Owns the tunnel child process and the task scanning its output.
pub struct TunnelSupervisor {
    binary: String,
    child: Child,
    scanner: JoinHandle<DiscoveryOutcome>,
}

impl TunnelSupervisor {
    /// Spawn `<binary> tunnel --url <local_url>` and start scanning. Spawn failure is returned immediately.
    pub fn start(
        binary: &str,
        local_url: &str,
        discovery_timeout: Option<Duration>,
        cell: EndpointCell,
    ) -> Result<Self, TunnelError> {
        let mut child = Command::new(binary)
            .args(["tunnel", "--url", local_url])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => TunnelError::NotFound {
                    binary: binary.to_string(),
                },
                _ => TunnelError::Spawn {
                    binary: binary.to_string(),
                    source: e,
                },
            })?;
        log::info!(
            "tunnel started: {} tunnel --url {} (pid {})",
            binary,
            local_url,
            child.id().map(|p| p.to_string()).unwrap_or_else(|| "?".to_string())
        );

        let (line_tx, line_rx) = mpsc::channel::<String>(LINE_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, line_tx.clone());
        }
        drop(line_tx);

        let scanner = tokio::spawn(scan_lines(
            line_rx,
            EndpointMatcher::trycloudflare(),
            cell,
            discovery_timeout,
        ));

        Ok(Self {
            binary: binary.to_string(),
            child,
            scanner,
        })
    }

    /// Kill the tunnel process and stop the scanner.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            log::debug!("tunnel kill: {}", e);
        }
        match self.child.try_wait() {
            Ok(Some(status)) => log::info!("tunnel {} stopped ({})", self.binary, status),
            Ok(None) => log::info!("tunnel {} stopped", self.binary),
            Err(e) => log::debug!("tunnel wait: {}", e),
        }
        self.scanner.abort();
    }
}

/// Run `<binary> --version`; Ok with its first output line when the binary is installed.
pub async fn tunnel_version(binary: &str) -> Result<String, TunnelError> {
    let output = Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TunnelError::NotFound {
                binary: binary.to_string(),
            },
            _ => TunnelError::Spawn {
                binary: binary.to_string(),
                source: e,
            },
        })?;
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    Ok(text.lines().next().unwrap_or("").trim().to_string())
}

/// Read lines from one pipe into the shared line channel until EOF or a read error.
/// Bytes that are not UTF-8 are replaced, so one bad line never ends the stream.
fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("tunnel output read failed: {}", e);
                    break;
                }
            }
        }
    });
}

/// Log every line; publish the first endpoint match. Keeps draining after the match (or timeout)
/// so the child never blocks on a full pipe, but matches no further lines.
pub async fn scan_lines(
    mut lines: mpsc::Receiver<String>,
    matcher: EndpointMatcher,
    cell: EndpointCell,
    discovery_timeout: Option<Duration>,
) -> DiscoveryOutcome {
    let discover = async {
        while let Some(line) = lines.recv().await {
            log::debug!("tunnel: {}", line.trim_end());
            if let Some(endpoint) = matcher.find(&line) {
                return Some(endpoint);
            }
        }
        None
    };

    let found = match discovery_timeout {
        Some(limit) => match tokio::time::timeout(limit, discover).await {
            Ok(found) => found.ok_or(DiscoveryOutcome::Exhausted),
            Err(_) => Err(DiscoveryOutcome::TimedOut),
        },
        None => discover.await.ok_or(DiscoveryOutcome::Exhausted),
    };

    let outcome = match found {
        Ok(endpoint) => {
            if cell.publish(endpoint.clone()) {
                log::info!("public url: {}", endpoint.public_url());
                log::info!("relay url: {}", endpoint.relay_url());
            }
            DiscoveryOutcome::Published(endpoint)
        }
        Err(DiscoveryOutcome::TimedOut) => {
            log::error!("tunnel did not report a public url in time; pairing stays unavailable");
            DiscoveryOutcome::TimedOut
        }
        Err(other) => {
            log::error!("tunnel output ended without a public url; pairing stays unavailable");
            other
        }
    };

    while let Some(line) = lines.recv().await {
        log::debug!("tunnel: {}", line.trim_end());
    }
    log::info!("tunnel output closed");
    outcome
}
