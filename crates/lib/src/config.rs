//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.edgelink/config.json`) and environment.
//! Every field has a default so an empty `{}` (or a missing file) runs the tunnel relay on 0.0.0.0:8000.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Where the public endpoint comes from (tunnel or LAN).
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Tunnel subprocess settings.
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Allowlisted commands: command text -> argv. Empty means commands are only acknowledged.
    #[serde(default)]
    pub commands: BTreeMap<String, Vec<String>>,
}

/// Gateway bind, port, and session limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP and WebSocket (default 8000).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Maximum concurrent sessions. None = unbounded.
    #[serde(default)]
    pub max_sessions: Option<usize>,
}

fn default_gateway_port() -> u16 {
    8000
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            max_sessions: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    #[serde(default)]
    pub mode: EndpointMode,
}

/// How the relay URL handed to the phone is obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointMode {
    /// Spawn the tunnel binary and discover its public URL.
    #[default]
    Tunnel,

    /// No tunnel; advertise ws://<lan-ip>:<port>/ws.
    Lan,
}

impl EndpointMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointMode::Tunnel => "tunnel",
            EndpointMode::Lan => "lan",
        }
    }
}

/// Tunnel binary and discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelConfig {
    /// Tunnel binary (default "cloudflared"). Overridden by EDGELINK_TUNNEL_BIN env.
    #[serde(default = "default_tunnel_binary")]
    pub binary: String,

    /// Give up matching the public URL after this many seconds. None = wait forever.
    #[serde(default)]
    pub discovery_timeout_secs: Option<u64>,
}

fn default_tunnel_binary() -> String {
    "cloudflared".to_string()
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            binary: default_tunnel_binary(),
            discovery_timeout_secs: None,
        }
    }
}

/// Resolve the tunnel binary: env EDGELINK_TUNNEL_BIN overrides config.
pub fn resolve_tunnel_binary(config: &Config) -> String {
    std::env::var("EDGELINK_TUNNEL_BIN")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| config.tunnel.binary.trim().to_string())
}

/// Local URL the tunnel forwards to. The tunnel always targets localhost, whatever the bind address.
pub fn local_target_url(config: &Config) -> String {
    format!("http://localhost:{}", config.gateway.port)
}

/// True if the bind address listens on every interface.
pub fn is_wildcard_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "0.0.0.0" || b == "::" || b == "[::]"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("EDGELINK_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".edgelink").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or EDGELINK_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
