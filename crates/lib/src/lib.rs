//! edgelink core library: tunnel discovery, pairing page, and the WebSocket command relay
//! used by the CLI.

pub mod commands;
pub mod config;
pub mod gateway;
pub mod init;
pub mod session;
pub mod tunnel;
