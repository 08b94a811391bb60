//! Public endpoint discovery: tunnel subprocess supervision, LAN fallback, and the write-once endpoint cell.

mod endpoint;
mod lan;
mod supervisor;

pub use endpoint::{EndpointCell, EndpointMatcher, EndpointPublisher, TunnelEndpoint, RELAY_PATH};
pub use lan::{advertised_ip, lan_endpoint, outbound_ip};
pub use supervisor::{scan_lines, tunnel_version, DiscoveryOutcome, TunnelError, TunnelSupervisor};
