//! Wall-clock timestamps for stamping ticks.
//!
//! Throttling and backoff use `tokio::time::Instant` instead, so they follow
//! the runtime clock (and can be paused in tests).

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as **microseconds** since Unix epoch.
#[inline]
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
