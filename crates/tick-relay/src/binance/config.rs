//! Binance-specific configuration extraction.

use std::collections::HashMap;
use std::time::Duration;

use tick_core::config::FeedConfig;
use tick_core::error::RelayError;

use super::DEFAULT_WS_BASE;

/// Parsed Binance configuration.
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub ws_base_url: String,
    pub stream: String,
    /// Lowercased; Binance rejects upper-case stream names.
    pub symbols: Vec<String>,
    pub extra_headers: HashMap<String, String>,
    pub ping_interval: Option<Duration>,
}

impl BinanceConfig {
    pub fn from_feed(feed: &FeedConfig) -> Result<Self, RelayError> {
        let ws_base_url = feed
            .ws_base_url
            .as_deref()
            .unwrap_or(DEFAULT_WS_BASE)
            .trim_end_matches('/')
            .to_string();
        if !ws_base_url.starts_with("ws://") && !ws_base_url.starts_with("wss://") {
            return Err(RelayError::Config(format!("feed.ws_base_url is not a websocket url: {ws_base_url}")));
        }

        let stream = feed.effective_stream();
        if stream.is_empty() || stream.contains('/') {
            return Err(RelayError::Config(format!("invalid binance stream: {stream:?}")));
        }

        let symbols = feed
            .effective_symbols()
            .iter()
            .map(|s| feed.normalize_symbol(s))
            .collect();

        Ok(Self {
            ws_base_url,
            stream,
            symbols,
            extra_headers: feed.extra_headers.clone().unwrap_or_default(),
            ping_interval: feed.ping_interval(),
        })
    }

    /// `wss://host/ws/{source}@trade`
    pub fn url_template(&self) -> String {
        format!("{}/{{source}}@{}", self.ws_base_url, self.stream)
    }
}
