//! WebSocket implementation of the transport seam.

pub mod client;

pub use client::{WsConnConfig, WsConnector, WsTransport};
