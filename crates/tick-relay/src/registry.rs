//! Backend registry: factory for connector + decoder pairs from config.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tick_core::config::{AppConfig, FeedConfig};
use tick_core::error::RelayError;
use tick_core::transport::Connector;
use tick_core::ws::{WsConnConfig, WsConnector};

use crate::decoder::{JsonTickDecoder, TickDecoder};
use crate::relay::{FanInRelay, RelaySettings};

/// Everything needed to open sessions against one upstream.
pub struct FeedBackend {
    pub label: String,
    pub connector: Arc<dyn Connector>,
    pub decoder: Arc<dyn TickDecoder>,
    /// Source identifiers relayed by default.
    pub sources: Vec<String>,
}

/// Create a backend based on the `exchange` field in the feed config.
pub fn create_backend(feed: &FeedConfig) -> Result<FeedBackend> {
    feed.validate()?;
    let backend = match feed.exchange.to_lowercase().as_str() {
        "binance" => crate::binance::build(feed)?,
        "custom" => build_custom(feed)?,
        other => return Err(anyhow!("Unknown exchange: {other}")),
    };
    Ok(backend)
}

/// Build the relay and its default source list from a full app config.
pub fn create_relay(config: &AppConfig) -> Result<(FanInRelay, Vec<String>)> {
    let backend = create_backend(&config.feed)?;
    let settings = RelaySettings::from_config(&config.relay());
    tracing::info!(
        "backend {} ready: {} sources, rate limit {:?}",
        backend.label,
        backend.sources.len(),
        settings.rate_limit
    );
    let relay = FanInRelay::new(settings, backend.connector, backend.decoder);
    Ok((relay, backend.sources))
}

/// Any JSON WebSocket feed: URL template plus symbol/price field names.
fn build_custom(feed: &FeedConfig) -> Result<FeedBackend, RelayError> {
    let template = feed
        .url_template
        .clone()
        .ok_or_else(|| RelayError::Config("custom feed requires feed.url_template".into()))?;

    let mut conn = WsConnConfig::new(template);
    conn.extra_headers = feed.extra_headers.clone().unwrap_or_default();
    conn.ping_interval = feed.ping_interval();

    let decoder = JsonTickDecoder::new(
        feed.symbol_field.as_deref().unwrap_or("s"),
        feed.price_field.as_deref().unwrap_or("p"),
    );

    Ok(FeedBackend {
        label: "custom".into(),
        connector: Arc::new(WsConnector::new(conn)),
        decoder: Arc::new(decoder),
        sources: feed.effective_symbols().iter().map(|s| feed.normalize_symbol(s)).collect(),
    })
}
