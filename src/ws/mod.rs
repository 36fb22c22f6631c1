//! WebSocket client library
//!
//! Provides a duplex WebSocket connection with bounded receives,
//! ping/pong handling, and a configurable reconnection backoff.

mod client;
mod types;

pub use client::WsClient;
pub use types::{Backoff, WsConfig, WsError, WsMessage};
