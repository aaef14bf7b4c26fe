//! Transport seam between a feed connection and the wire.
//!
//! A [`Connector`] opens one [`Transport`] per connection attempt. The relay
//! never sees sockets directly, so the WebSocket client and the scripted
//! connectors used in tests are interchangeable.

use async_trait::async_trait;

use crate::error::RelayError;

/// One live upstream connection.
#[async_trait]
pub trait Transport: Send {
    /// Wait for the next text payload.
    ///
    /// `Ok(None)` means the peer closed the connection; `Err` is a transport
    /// failure. Either way the caller discards this transport and reconnects.
    async fn recv(&mut self) -> Result<Option<String>, RelayError>;

    /// Release the connection. Must be safe to call more than once.
    async fn close(&mut self);
}

/// Factory for transports, keyed by source identifier.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform one connection attempt for `source`.
    async fn connect(&self, source: &str) -> Result<Box<dyn Transport>, RelayError>;
}
