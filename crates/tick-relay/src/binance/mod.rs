//! Binance spot market streams.
//!
//! One raw WebSocket per symbol (`/ws/<symbol>@<stream>`). Trade and
//! aggTrade payloads both carry the symbol in `s` and the price in `p`, so the
//! default [`JsonTickDecoder`] handles either.

pub mod config;

use std::sync::Arc;

use tick_core::config::FeedConfig;
use tick_core::error::RelayError;
use tick_core::ws::{WsConnConfig, WsConnector};

use self::config::BinanceConfig;
use crate::decoder::JsonTickDecoder;
use crate::registry::FeedBackend;

pub const DEFAULT_WS_BASE: &str = "wss://stream.binance.com:9443/ws";

/// Build the Binance backend from the feed config.
pub fn build(feed: &FeedConfig) -> Result<FeedBackend, RelayError> {
    let cfg = BinanceConfig::from_feed(feed)?;

    let mut conn = WsConnConfig::new(cfg.url_template());
    conn.extra_headers = cfg.extra_headers.clone();
    conn.ping_interval = cfg.ping_interval;

    Ok(FeedBackend {
        label: "binance".into(),
        connector: Arc::new(WsConnector::new(conn)),
        decoder: Arc::new(JsonTickDecoder::default()),
        sources: cfg.symbols,
    })
}
