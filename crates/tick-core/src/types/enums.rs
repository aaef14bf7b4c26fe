//! Lifecycle and policy enumerations used throughout the relay.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Feed connection state
// ---------------------------------------------------------------------------

/// State of one upstream feed connection.
///
/// Owned by exactly one `FeedConnection`; everyone else only observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Connecting,
    Open,
    /// Waiting out the backoff before connection attempt number `attempt`.
    Reconnecting { attempt: u32, next_attempt_at: Instant },
    Closing,
    Closed,
}

impl FeedState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Reconnecting { attempt, next_attempt_at } => {
                let wait = next_attempt_at.saturating_duration_since(Instant::now());
                write!(f, "reconnecting(attempt={attempt}, in={wait:?})")
            }
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// State of one relay session. Transitions are strictly
/// `Active -> Cancelling -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Active,
    Cancelling,
    Closed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal forward step.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Cancelling) | (Self::Cancelling, Self::Closed)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Cancelling => write!(f, "cancelling"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a session ended. Delivered to the reader exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// `cancel()` was called on the subscription.
    Cancelled,
    /// The subscription handle or its outbound receiver went away.
    ReaderGone,
    /// Every source used up its reconnect budget.
    AllSourcesExhausted,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::ReaderGone => write!(f, "reader gone"),
            Self::AllSourcesExhausted => write!(f, "all sources exhausted"),
        }
    }
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Throttle policy for admitting ticks downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitMode {
    /// Admit every tick.
    Off,
    /// One window shared by all symbols.
    Global,
    /// An independent window per symbol.
    #[default]
    PerSymbol,
}

/// Resolved rate limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub mode: RateLimitMode,
    pub interval: Duration,
}
