//! Public endpoint: the URL a phone uses to reach the relay, matched out of tunnel output and published once.

use regex::Regex;
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;

/// Public tunnel URL as printed by cloudflared quick tunnels.
const TRYCLOUDFLARE_PATTERN: &str = r"https://\S*?trycloudflare\.com";

/// Path of the WebSocket relay on the gateway.
pub const RELAY_PATH: &str = "/ws";

/// Publicly reachable address plus the WebSocket URL derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEndpoint {
    public_url: String,
    relay_url: String,
}

impl TunnelEndpoint {
    /// Build from the public base URL: `https` becomes `wss`, `http` becomes `ws`, and the relay path is appended.
    pub fn from_public_url(public_url: impl Into<String>) -> Self {
        let public_url = public_url.into();
        let base = public_url.trim_end_matches('/');
        let relay_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        Self {
            relay_url: format!("{}{}", relay_base, RELAY_PATH),
            public_url,
        }
    }

    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// WebSocket URL encoded into the pairing code.
    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }
}

/// Finds the public URL in a line of tunnel output.
#[derive(Debug, Clone)]
pub struct EndpointMatcher {
    pattern: Regex,
}

impl Default for EndpointMatcher {
    fn default() -> Self {
        Self::trycloudflare()
    }
}

impl EndpointMatcher {
    /// Matcher for `https://<host>trycloudflare.com`.
    pub fn trycloudflare() -> Self {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN
            .get_or_init(|| Regex::new(TRYCLOUDFLARE_PATTERN).expect("endpoint pattern is valid"))
            .clone();
        Self { pattern }
    }

    /// First endpoint URL in the line, if any.
    pub fn find(&self, line: &str) -> Option<TunnelEndpoint> {
        self.pattern
            .find(line)
            .map(|m| TunnelEndpoint::from_public_url(m.as_str()))
    }
}

#[derive(Default)]
struct Shared {
    value: OnceLock<TunnelEndpoint>,
    published: Notify,
}

/// Write side of the endpoint. Cloning shares the same cell.
#[derive(Clone, Default)]
pub struct EndpointCell {
    shared: Arc<Shared>,
}

impl EndpointCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the endpoint. Returns true only for the call that actually stored it; later calls change nothing.
    pub fn publish(&self, endpoint: TunnelEndpoint) -> bool {
        let stored = self.shared.value.set(endpoint).is_ok();
        if stored {
            self.shared.published.notify_waiters();
        }
        stored
    }

    /// Read-only handle for the HTTP side.
    pub fn publisher(&self) -> EndpointPublisher {
        EndpointPublisher {
            shared: self.shared.clone(),
        }
    }
}

/// Read side of the endpoint: never blocks, never sees a half-written value.
#[derive(Clone)]
pub struct EndpointPublisher {
    shared: Arc<Shared>,
}

impl EndpointPublisher {
    /// The published endpoint, or None while discovery has not succeeded.
    pub fn get(&self) -> Option<TunnelEndpoint> {
        self.shared.value.get().cloned()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.value.get().is_some()
    }

    /// Resolve once the endpoint is published (immediately if it already is).
    pub async fn wait(&self) -> TunnelEndpoint {
        loop {
            let notified = self.shared.published.notified();
            if let Some(endpoint) = self.get() {
                return endpoint;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn derives_relay_url_from_log_line() {
        let matcher = EndpointMatcher::trycloudflare();
        let endpoint = matcher
            .find("2024-01-01 https://abcd-1234.trycloudflare.com is live")
            .unwrap();
        assert_eq!(endpoint.public_url(), "https://abcd-1234.trycloudflare.com");
        assert_eq!(endpoint.relay_url(), "wss://abcd-1234.trycloudflare.com/ws");
    }

    #[test]
    fn matches_inside_cloudflared_banner() {
        let matcher = EndpointMatcher::trycloudflare();
        let line = "2024-05-02T10:00:00Z INF |  https://quiet-river-lamp.trycloudflare.com                    |";
        let endpoint = matcher.find(line).unwrap();
        assert_eq!(endpoint.relay_url(), "wss://quiet-river-lamp.trycloudflare.com/ws");
    }

    #[test]
    fn ignores_lines_without_endpoint() {
        let matcher = EndpointMatcher::trycloudflare();
        assert!(matcher.find("INF Requesting new quick Tunnel on trycloudflare.com...").is_none());
        assert!(matcher.find("http://abcd.trycloudflare.com").is_none());
        assert!(matcher.find("HTTPS://ABCD.TRYCLOUDFLARE.COM").is_none());
        assert!(matcher.find("").is_none());
    }

    #[test]
    fn first_url_on_a_line_wins() {
        let matcher = EndpointMatcher::trycloudflare();
        let endpoint = matcher
            .find("https://one.trycloudflare.com and https://two.trycloudflare.com")
            .unwrap();
        assert_eq!(endpoint.public_url(), "https://one.trycloudflare.com");
    }

    #[test]
    fn http_base_maps_to_ws() {
        let endpoint = TunnelEndpoint::from_public_url("http://192.168.1.5:8000/");
        assert_eq!(endpoint.relay_url(), "ws://192.168.1.5:8000/ws");
    }

    #[test]
    fn publisher_not_ready_before_publish() {
        let cell = EndpointCell::new();
        let publisher = cell.publisher();
        assert!(publisher.get().is_none());
        assert!(!publisher.is_ready());
    }

    #[test]
    fn publish_is_write_once_and_stable() {
        let cell = EndpointCell::new();
        let publisher = cell.publisher();
        let first = TunnelEndpoint::from_public_url("https://first.trycloudflare.com");
        let second = TunnelEndpoint::from_public_url("https://second.trycloudflare.com");

        assert!(cell.publish(first.clone()));
        assert!(!cell.publish(second));
        for _ in 0..3 {
            assert_eq!(publisher.get(), Some(first.clone()));
        }
        assert!(cell.publisher().is_ready());
    }

    #[tokio::test]
    async fn wait_resolves_after_publish() {
        let cell = EndpointCell::new();
        let publisher = cell.publisher();
        let waiter = tokio::spawn(async move { publisher.wait().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cell.publish(TunnelEndpoint::from_public_url("https://late.trycloudflare.com"));

        let endpoint = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("wait timed out")
            .unwrap();
        assert_eq!(endpoint.relay_url(), "wss://late.trycloudflare.com/ws");
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_published() {
        let cell = EndpointCell::new();
        cell.publish(TunnelEndpoint::from_public_url("https://early.trycloudflare.com"));
        let endpoint = cell.publisher().wait().await;
        assert_eq!(endpoint.public_url(), "https://early.trycloudflare.com");
    }
}
