//! Relay session: one client connection and its command/ack loop.
//!
//! A session is Open until the client closes, the transport fails, or the server shuts down; then
//! it goes Closing -> Closed and is never reused. Every text frame received while Open is forwarded
//! to the command handler and answered with exactly one ack.

use crate::commands::CommandHandler;
use crate::gateway::{AckFrame, CommandFrame};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Unique session identifier (opaque string).
pub type SessionId = String;

/// Lifecycle; only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionStatus {
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

/// What the transport delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame: one command.
    Text(String),
    /// The client sent a close frame.
    Close,
    /// Binary, ping, pong: nothing to relay.
    Ignored,
}

/// The connection a session owns (a WebSocket in the gateway).
#[async_trait]
pub trait SessionTransport: Send {
    /// Next frame; None when the connection is gone.
    async fn recv(&mut self) -> Option<Result<Inbound, String>>;
    async fn send_text(&mut self, text: String) -> Result<(), String>;
    /// Close the connection. Errors are ignored; the peer may already be gone.
    async fn close(&mut self);
}

pub struct Session<T> {
    id: SessionId,
    status: SessionStatus,
    connected_at: DateTime<Local>,
    transport: T,
}

impl<T: SessionTransport> Session<T> {
    /// New Open session owning `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            id: format!("sess-{}", uuid::Uuid::new_v4()),
            status: SessionStatus::Open,
            connected_at: Local::now(),
            transport,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn connected_at(&self) -> DateTime<Local> {
        self.connected_at
    }

    /// Metadata for the registry.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            connected_at: self.connected_at,
        }
    }

    fn advance(&mut self, next: SessionStatus) -> bool {
        if next > self.status {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Send one text frame. Fails with `SessionError::Closed` once the session has left Open.
    pub async fn send(&mut self, text: String) -> Result<(), SessionError> {
        if self.status != SessionStatus::Open {
            return Err(SessionError::Closed);
        }
        self.transport
            .send_text(text)
            .await
            .map_err(SessionError::Transport)
    }

    /// Open -> Closing -> Closed, releasing the transport. No-op if already closing or closed.
    pub async fn close(&mut self) {
        if !self.advance(SessionStatus::Closing) {
            return;
        }
        self.transport.close().await;
        self.advance(SessionStatus::Closed);
    }

    /// Receive commands, forward each to `handler`, ack each, until the connection ends or `shutdown` resolves.
    /// Returns the number of commands handled. Returns immediately on a session that is not Open.
    pub async fn relay<F>(&mut self, handler: &dyn CommandHandler, shutdown: F) -> u64
    where
        F: Future<Output = ()> + Send,
    {
        if self.status != SessionStatus::Open {
            return 0;
        }
        log::info!("{} connected", self.id);
        tokio::pin!(shutdown);
        let mut handled = 0u64;

        let reason = loop {
            let inbound = tokio::select! {
                biased;

                _ = &mut shutdown => break "server shutting down".to_string(),
                inbound = self.transport.recv() => inbound,
            };
            match inbound {
                Some(Ok(Inbound::Text(text))) => {
                    let command = CommandFrame::parse(&text);
                    log::info!("{}: command received: {}", self.id, command.payload);
                    let outcome = handler.handle(&self.id, &command.payload).await;
                    let ack = AckFrame::for_outcome(&command, &outcome);
                    handled += 1;
                    if let Err(e) = self.send(ack.to_text()).await {
                        break format!("ack not sent: {}", e);
                    }
                }
                Some(Ok(Inbound::Ignored)) => continue,
                Some(Ok(Inbound::Close)) => break "closed by client".to_string(),
                Some(Err(e)) => break format!("transport error: {}", e),
                None => break "connection dropped".to_string(),
            }
        };

        self.close().await;
        log::info!("{} disconnected: {} ({} command(s))", self.id, reason, handled);
        handled
    }
}

/// Live session metadata for the health probe.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub connected_at: DateTime<Local>,
}

/// Sessions currently connected. Holds metadata only; each transport stays with its session task.
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<SessionId, SessionInfo>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a live session. Takes the metadata by value so no borrow of the session spans the await.
    pub async fn register(&self, info: SessionInfo) {
        self.inner.write().await.insert(info.id.clone(), info);
    }

    pub async fn remove(&self, id: &str) {
        self.inner.write().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Sessions ordered by connection time.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut list: Vec<SessionInfo> = self.inner.read().await.values().cloned().collect();
        list.sort_by_key(|s| s.connected_at);
        list
    }
}
