//! # tick-relay
//!
//! Fans in price ticks from many upstream WebSocket sources into one ordered,
//! cancellable, rate-limited stream per subscriber.
//!
//! ## Architecture
//!
//! [`FanInRelay::subscribe`] opens one [`feed::FeedConnection`] per source.
//! Each source task decodes payloads with a [`decoder::TickDecoder`], gates
//! them through a shared [`rate_limit::RateLimiter`], and forwards them to the
//! session driver, which delivers them to the [`Subscription`].
//!
//! ## Modules
//!
//! - [`feed`]: connection lifecycle, reconnect with backoff
//! - [`reconnect`]: backoff policy
//! - [`decoder`]: raw payload → `Tick`
//! - [`rate_limit`]: admission window (global or per symbol)
//! - [`session`]: subscription state machine and teardown
//! - [`registry`]: backend factory from config (Binance, custom JSON feeds)

pub mod binance;
pub mod decoder;
pub mod feed;
pub mod json_util;
pub mod rate_limit;
pub mod reconnect;
pub mod registry;
pub mod relay;
pub mod session;

#[cfg(test)]
mod mock;

pub use relay::{FanInRelay, RelaySettings};
pub use session::{RelayEvent, SourceStatus, Subscription};
