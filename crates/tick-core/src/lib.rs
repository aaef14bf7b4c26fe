//! # tick-core
//!
//! Core crate for the tick relay, providing:
//!
//! - **Types** (`types`): `Tick` plus feed/session lifecycle enums
//! - **Configuration** (`config`): JSON config deserialization
//! - **Error types** (`error`): `RelayError` and `DecodeError` via thiserror
//! - **Transport** (`transport`): `Connector`/`Transport` traits
//! - **WebSocket** (`ws`): TLS WebSocket transport with keep-alive pings
//! - **Time utilities** (`time_util`): wall-clock timestamps
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod transport;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use types::*;
