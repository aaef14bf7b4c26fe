//! Typed error definitions for the tick relay.
//!
//! [`RelayError`] covers every failure the relay distinguishes. Only
//! `SourceExhausted` and `SessionTerminated` are ever visible outside a source
//! task; decode and transport failures are handled where they occur.

use thiserror::Error;

/// Why a single inbound payload could not be turned into a [`crate::Tick`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload is not valid JSON.
    #[error("malformed json: {0}")]
    Malformed(String),

    /// A required field is absent (e.g. subscription acks carry no symbol).
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// Symbol field present but empty.
    #[error("empty symbol")]
    EmptySymbol,

    /// Price field is not a finite number or numeric string.
    #[error("invalid price: {0}")]
    InvalidPrice(String),
}

/// Domain errors for the tick relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// A malformed inbound message. Isolated to that message.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Connection-level failure; triggers a reconnect of that source.
    #[error("transport error: {0}")]
    Transport(String),

    /// The source used up its reconnect budget and was removed.
    #[error("source {source_id} exhausted after {attempts} reconnect attempts")]
    SourceExhausted { source_id: String, attempts: u32 },

    /// The session has ended and accepts no more work.
    #[error("session terminated: {0}")]
    SessionTerminated(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
