//! WebSocket message source
//!
//! Connects to a WebSocket endpoint and yields text frames, answering server
//! pings and probing the connection with its own.

mod client;
mod types;

pub use client::{WsSource, WsStream};
pub use types::WsConfig;
