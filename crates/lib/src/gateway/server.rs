//! Gateway HTTP + WebSocket server (single port).

use crate::commands::{self, CommandHandler};
use crate::config::{self, Config, EndpointMode};
use crate::gateway::pairing::{self, PairingCodeRenderer, SvgQrRenderer};
use crate::session::{Inbound, Session, SessionRegistry, SessionTransport};
use crate::tunnel::{self, EndpointCell, EndpointPublisher, TunnelSupervisor};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};

/// Seconds a browser should wait before reloading the not-ready pairing page.
const RETRY_AFTER_SECS: &str = "3";

/// Shared state for the gateway (config, endpoint, command handler, live sessions).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// Read side of the public endpoint; None until discovery succeeds.
    pub endpoint: EndpointPublisher,
    /// Receives every relayed command.
    pub handler: Arc<dyn CommandHandler>,
    pub renderer: Arc<dyn PairingCodeRenderer>,
    pub sessions: Arc<SessionRegistry>,
    /// Free session slots when gateway.maxSessions is set; None means unbounded.
    pub session_slots: Option<Arc<Semaphore>>,
    /// Fires once on shutdown; every session closes its socket.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl GatewayState {
    pub fn new(config: Config, endpoint: EndpointPublisher, handler: Arc<dyn CommandHandler>) -> Self {
        let session_slots = config
            .gateway
            .max_sessions
            .map(|n| Arc::new(Semaphore::new(n)));
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config: Arc::new(config),
            endpoint,
            handler,
            renderer: Arc::new(SvgQrRenderer),
            sessions: Arc::new(SessionRegistry::new()),
            session_slots,
            shutdown_tx,
        }
    }
}

/// Routes: `/` pairing page, `/ws` relay, `/health` probe.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(pairing_http))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_http))
        .with_state(state)
}

/// Run the gateway: bind config.gateway.bind:config.gateway.port, start the endpoint source, serve until Ctrl+C/SIGTERM.
/// In tunnel mode a missing or unstartable tunnel binary is fatal. The tunnel is killed on the way out.
pub async fn run_gateway(config: Config, cell: EndpointCell) -> Result<()> {
    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    let supervisor = match config.endpoint.mode {
        EndpointMode::Tunnel => {
            let binary = config::resolve_tunnel_binary(&config);
            let timeout = config.tunnel.discovery_timeout_secs.map(Duration::from_secs);
            let supervisor = TunnelSupervisor::start(
                &binary,
                &config::local_target_url(&config),
                timeout,
                cell.clone(),
            )?;
            Some(supervisor)
        }
        EndpointMode::Lan => {
            let ip = tunnel::advertised_ip(&config.gateway.bind);
            let endpoint = tunnel::lan_endpoint(ip, config.gateway.port);
            log::info!("relay url: {}", endpoint.relay_url());
            cell.publish(endpoint);
            None
        }
    };

    let handler = commands::handler_from_config(&config);
    let state = GatewayState::new(config, cell.publisher(), handler);
    let served = serve(listener, state).await;

    if let Some(supervisor) = supervisor {
        supervisor.shutdown().await;
    }
    log::info!("gateway stopped");
    served
}

/// Serve the router on `listener` until Ctrl+C/SIGTERM, closing every session on the way out.
pub async fn serve(listener: TcpListener, state: GatewayState) -> Result<()> {
    let shutdown_tx = state.shutdown_tx.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("gateway server exited")
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Tells every open session to close before the server drains.
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, closing sessions");
    let _ = shutdown_tx.send(());
}

/// GET / shows the pairing page once the endpoint is known, 503 with Retry-After before.
async fn pairing_http(State(state): State<GatewayState>) -> Response {
    match state.endpoint.get() {
        Some(endpoint) => Html(pairing::pairing_page(&endpoint, state.renderer.as_ref())).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, RETRY_AFTER_SECS)],
            Html(pairing::not_ready_page()),
        )
            .into_response(),
    }
}

/// GET /health returns a simple status JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let endpoint = state.endpoint.get();
    let sessions: Vec<serde_json::Value> = state
        .sessions
        .list()
        .await
        .into_iter()
        .map(|s| json!({ "id": s.id, "connectedAt": s.connected_at.to_rfc3339() }))
        .collect();
    Json(json!({
        "runtime": "running",
        "ready": endpoint.is_some(),
        "relayUrl": endpoint.as_ref().map(|e| e.relay_url()),
        "mode": state.config.endpoint.mode.as_str(),
        "port": state.config.gateway.port,
        "sessions": sessions.len(),
        "sessionList": sessions,
    }))
}

/// GET /ws upgrades to WebSocket; each connection becomes its own session.
/// Malformed upgrades are rejected by the extractor. When the session limit is reached, answers 503.
async fn ws_handler(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    let permit = match &state.session_slots {
        Some(slots) => match slots.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                log::warn!("session limit reached, rejecting connection");
                return (StatusCode::SERVICE_UNAVAILABLE, "session limit reached").into_response();
            }
        },
        None => None,
    };
    let shutdown_rx = state.shutdown_tx.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, state, shutdown_rx, permit))
}

async fn handle_socket(
    socket: WebSocket,
    state: GatewayState,
    mut shutdown_rx: broadcast::Receiver<()>,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let mut session = Session::new(WsTransport { socket });
    state.sessions.register(session.info()).await;
    session
        .relay(state.handler.as_ref(), async move {
            let _ = shutdown_rx.recv().await;
        })
        .await;
    state.sessions.remove(session.id()).await;
}

/// axum WebSocket as a session transport.
struct WsTransport {
    socket: WebSocket,
}

#[async_trait]
impl SessionTransport for WsTransport {
    async fn recv(&mut self) -> Option<Result<Inbound, String>> {
        let msg = self.socket.recv().await?;
        Some(match msg {
            Ok(Message::Text(text)) => Ok(Inbound::Text(text)),
            Ok(Message::Close(_)) => Ok(Inbound::Close),
            Ok(_) => Ok(Inbound::Ignored),
            Err(e) => Err(e.to_string()),
        })
    }

    async fn send_text(&mut self, text: String) -> Result<(), String> {
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| e.to_string())
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.send(Message::Close(None)).await {
            log::debug!("ws close: {}", e);
        }
    }
}
