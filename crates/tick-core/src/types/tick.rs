//! The `Tick` value, the only data type flowing through the relay.
//!
//! # Timestamp convention
//!
//! `observed_at_us` is **microseconds since Unix epoch**, stamped locally when
//! the payload is decoded (not the exchange event time).

use serde::{Deserialize, Serialize};

/// One (symbol, price, time) observation from an upstream feed.
///
/// Immutable once built. Duplicates are legal: the same symbol repeats with
/// updated prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub observed_at_us: u64,
}

impl Tick {
    pub fn new(symbol: impl Into<String>, price: f64, observed_at_us: u64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            observed_at_us,
        }
    }
}

impl std::fmt::Display for Tick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.price)
    }
}
