//! Gateway: HTTP + WebSocket relay.
//!
//! Single port serves the pairing page (`/`), the health probe (`/health`) and the relay (`/ws`).
//! Every text frame on `/ws` is a command; the gateway answers each with one ack.

mod pairing;
mod protocol;
mod server;

pub use pairing::{not_ready_page, pairing_page, terminal_code, PairingCodeRenderer, SvgQrRenderer};
pub use protocol::{AckEnvelope, AckFrame, CommandEnvelope, CommandFrame, ACK_RECEIVED};
pub use server::{router, run_gateway, serve, GatewayState};
