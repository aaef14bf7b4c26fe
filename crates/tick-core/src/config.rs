//! Configuration parsing for the tick relay.
//!
//! Everything is read from a single JSON file. All fields except
//! `feed.exchange` are optional; the `effective_*` accessors supply defaults.
//!
//! # Example config
//!
//! ```json
//! {
//!   "logging": { "module_name": "tick-relay", "log_path": "/tmp/log" },
//!   "server": { "bind": "0.0.0.0:3000", "path": "/api/crypto" },
//!   "relay": {
//!     "channel_capacity": 1024,
//!     "close_grace_ms": 2000,
//!     "rate_limit": { "mode": "per_symbol", "interval_ms": 1000 },
//!     "reconnect": { "initial_delay_ms": 5000, "max_attempts": 10 }
//!   },
//!   "feed": { "exchange": "binance", "symbols": ["btcusdt", "ethusdt"] }
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Deserialize;

use crate::error::RelayError;
use crate::types::{RateLimitMode, RateLimitPolicy};

/// Pairs relayed when `feed.symbols` is omitted.
pub const DEFAULT_SYMBOLS: [&str; 5] = ["btcusdt", "ethusdt", "bnbusdt", "xrpusdt", "adausdt"];

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub logging: Option<LoggingConfig>,
    pub server: Option<ServerConfig>,
    pub relay: Option<RelayConfig>,
    pub feed: FeedConfig,
}

impl AppConfig {
    /// Relay settings, or all defaults when the block is absent.
    pub fn relay(&self) -> RelayConfig {
        self.relay.clone().unwrap_or_default()
    }

    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    /// Reject configs that would produce a session with nothing to do.
    pub fn validate(&self) -> Result<(), RelayError> {
        self.feed.validate()?;
        let relay = self.relay();
        if relay.effective_channel_capacity() == 0 {
            return Err(RelayError::Config("relay.channel_capacity must be > 0".into()));
        }
        let backoff = relay.reconnect_settings();
        if backoff.effective_initial_delay() > backoff.effective_max_delay() {
            return Err(RelayError::Config(
                "relay.reconnect.initial_delay_ms must not exceed max_delay_ms".into(),
            ));
        }
        if let Some(ref r) = relay.reconnect {
            if r.multiplier.is_some_and(|m| !m.is_finite() || m < 1.0) {
                return Err(RelayError::Config("relay.reconnect.multiplier must be >= 1.0".into()));
            }
            if r.jitter_factor.is_some_and(|j| !(0.0..=1.0).contains(&j)) {
                return Err(RelayError::Config("relay.reconnect.jitter_factor must be in [0, 1]".into()));
            }
        }
        Ok(())
    }
}

/// Logging metadata block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
}

/// SSE endpoint settings for the runner.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    /// Listen address (default `0.0.0.0:3000`).
    pub bind: Option<String>,
    /// Route serving the event stream (default `/api/crypto`).
    pub path: Option<String>,
}

impl ServerConfig {
    pub fn effective_bind(&self) -> String {
        self.bind.clone().unwrap_or_else(|| "0.0.0.0:3000".into())
    }

    pub fn effective_path(&self) -> String {
        self.path.clone().unwrap_or_else(|| "/api/crypto".into())
    }
}

/// Per-session relay tuning.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    /// Capacity of the fan-in and outbound channels (default: 1024).
    pub channel_capacity: Option<usize>,

    /// How long teardown waits for sources to acknowledge close (default: 2000).
    pub close_grace_ms: Option<u64>,

    pub rate_limit: Option<RateLimitConfig>,

    pub reconnect: Option<ReconnectSettings>,
}

impl RelayConfig {
    pub fn effective_channel_capacity(&self) -> usize {
        self.channel_capacity.unwrap_or(1024)
    }

    pub fn effective_close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms.unwrap_or(2_000))
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        let rl = self.rate_limit.clone().unwrap_or_default();
        RateLimitPolicy {
            mode: rl.mode.unwrap_or_default(),
            interval: Duration::from_millis(rl.interval_ms.unwrap_or(1_000)),
        }
    }

    pub fn reconnect_settings(&self) -> ReconnectSettings {
        self.reconnect.clone().unwrap_or_default()
    }
}

/// Rate limit block. Defaults to per-symbol, 1000 ms.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateLimitConfig {
    pub mode: Option<RateLimitMode>,
    pub interval_ms: Option<u64>,
}

/// Reconnect backoff block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconnectSettings {
    /// Delay before the first retry (default: 5000).
    pub initial_delay_ms: Option<u64>,
    /// Backoff ceiling (default: 60000).
    pub max_delay_ms: Option<u64>,
    /// Backoff growth factor (default: 2.0).
    pub multiplier: Option<f64>,
    /// Fraction of the delay randomized in either direction (default: 0.1).
    pub jitter_factor: Option<f64>,
    /// Consecutive failed attempts before the source is dropped.
    /// `0` retries forever (default: 10).
    pub max_attempts: Option<u32>,
}

impl ReconnectSettings {
    pub fn effective_initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms.unwrap_or(5_000))
    }

    pub fn effective_max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.unwrap_or(60_000))
    }

    pub fn effective_multiplier(&self) -> f64 {
        self.multiplier.unwrap_or(2.0)
    }

    pub fn effective_jitter_factor(&self) -> f64 {
        self.jitter_factor.unwrap_or(0.1)
    }

    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(10)
    }
}

/// Upstream feed description.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// `"binance"` or `"custom"`.
    pub exchange: String,

    /// Source identifiers, one upstream connection each.
    pub symbols: Option<Vec<String>>,

    /// Binance stream kind appended to the symbol (default: `"trade"`).
    pub stream: Option<String>,

    /// Binance endpoint override (default: `wss://stream.binance.com:9443/ws`).
    pub ws_base_url: Option<String>,

    /// Custom feeds: URL with a `{source}` placeholder.
    pub url_template: Option<String>,

    /// Custom feeds: JSON field carrying the symbol (default: `"s"`).
    pub symbol_field: Option<String>,

    /// Custom feeds: JSON field carrying the price (default: `"p"`).
    pub price_field: Option<String>,

    /// Client keep-alive ping interval in seconds. No pings when absent.
    pub ping_interval_sec: Option<u64>,

    /// Extra HTTP headers for the WebSocket handshake.
    pub extra_headers: Option<HashMap<String, String>>,
}

impl FeedConfig {
    pub fn effective_symbols(&self) -> Vec<String> {
        self.symbols
            .clone()
            .unwrap_or_else(|| DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect())
    }

    pub fn effective_stream(&self) -> String {
        self.stream.clone().unwrap_or_else(|| "trade".into())
    }

    /// Source identifier as it will be dialed: Binance stream names are
    /// lowercase, custom identifiers are only trimmed.
    pub fn normalize_symbol(&self, symbol: &str) -> String {
        let trimmed = symbol.trim();
        if self.exchange.eq_ignore_ascii_case("binance") {
            trimmed.to_lowercase()
        } else {
            trimmed.to_string()
        }
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval_sec.filter(|s| *s > 0).map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        let symbols = self.effective_symbols();
        if symbols.is_empty() {
            return Err(RelayError::Config("feed.symbols must not be empty".into()));
        }
        if symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(RelayError::Config("feed.symbols contains an empty entry".into()));
        }
        let mut seen = HashSet::with_capacity(symbols.len());
        for symbol in &symbols {
            if !seen.insert(self.normalize_symbol(symbol)) {
                return Err(RelayError::Config(format!("feed.symbols lists {symbol} more than once")));
            }
        }
        match self.exchange.to_lowercase().as_str() {
            "binance" => Ok(()),
            "custom" => match self.url_template {
                Some(ref t) if t.contains("{source}") => Ok(()),
                Some(_) => Err(RelayError::Config("feed.url_template must contain {source}".into())),
                None => Err(RelayError::Config("custom feed requires feed.url_template".into())),
            },
            other => Err(RelayError::Config(format!("unknown exchange: {other}"))),
        }
    }
}

/// Parse a JSON config string.
pub fn parse_config(content: &str) -> anyhow::Result<AppConfig> {
    let config: AppConfig = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse_config(r#"{"feed":{"exchange":"binance"}}"#).unwrap();
        assert_eq!(cfg.feed.effective_symbols().len(), 5);
        assert_eq!(cfg.feed.effective_stream(), "trade");
        let relay = cfg.relay();
        assert_eq!(relay.effective_channel_capacity(), 1024);
        let policy = relay.rate_limit_policy();
        assert_eq!(policy.mode, RateLimitMode::PerSymbol);
        assert_eq!(policy.interval, Duration::from_millis(1000));
        let rc = relay.reconnect_settings();
        assert_eq!(rc.effective_initial_delay(), Duration::from_secs(5));
        assert_eq!(rc.effective_max_attempts(), 10);
        assert_eq!(cfg.server().effective_path(), "/api/crypto");
    }

    #[test]
    fn full_config() {
        let cfg = parse_config(
            r#"{
                "logging": {"module_name": "relay", "log_path": "/tmp"},
                "server": {"bind": "127.0.0.1:8080"},
                "relay": {
                    "channel_capacity": 16,
                    "rate_limit": {"mode": "global", "interval_ms": 250},
                    "reconnect": {"initial_delay_ms": 100, "max_attempts": 0}
                },
                "feed": {"exchange": "binance", "symbols": ["btcusdt"], "ping_interval_sec": 30}
            }"#,
        )
        .unwrap();
        let relay = cfg.relay();
        assert_eq!(relay.effective_channel_capacity(), 16);
        assert_eq!(relay.rate_limit_policy().mode, RateLimitMode::Global);
        assert_eq!(relay.reconnect_settings().effective_max_attempts(), 0);
        assert_eq!(cfg.feed.ping_interval(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.server().effective_bind(), "127.0.0.1:8080");
    }

    #[test]
    fn rejects_empty_symbols() {
        assert!(parse_config(r#"{"feed":{"exchange":"binance","symbols":[]}}"#).is_err());
        assert!(parse_config(r#"{"feed":{"exchange":"binance","symbols":[" "]}}"#).is_err());
    }

    #[test]
    fn rejects_duplicate_symbols_after_normalizing() {
        assert!(parse_config(r#"{"feed":{"exchange":"binance","symbols":["BTCUSDT","btcusdt"]}}"#).is_err());
        assert!(
            parse_config(r#"{"feed":{"exchange":"custom","url_template":"ws://x/{source}","symbols":["a"," a"]}}"#)
                .is_err()
        );
        // Custom identifiers are case-sensitive.
        assert!(
            parse_config(r#"{"feed":{"exchange":"custom","url_template":"ws://x/{source}","symbols":["A","a"]}}"#)
                .is_ok()
        );
    }

    #[test]
    fn rejects_initial_delay_above_cap() {
        let json = r#"{"relay":{"reconnect":{"initial_delay_ms":90000}},"feed":{"exchange":"binance"}}"#;
        assert!(parse_config(json).is_err());
        let json = r#"{"relay":{"reconnect":{"initial_delay_ms":90000,"max_delay_ms":120000}},"feed":{"exchange":"binance"}}"#;
        assert!(parse_config(json).is_ok());
    }

    #[test]
    fn rejects_unknown_exchange() {
        assert!(parse_config(r#"{"feed":{"exchange":"kraken"}}"#).is_err());
    }

    #[test]
    fn custom_feed_needs_template() {
        assert!(parse_config(r#"{"feed":{"exchange":"custom"}}"#).is_err());
        assert!(parse_config(r#"{"feed":{"exchange":"custom","url_template":"wss://x/ws"}}"#).is_err());
        assert!(
            parse_config(r#"{"feed":{"exchange":"custom","url_template":"wss://x/{source}"}}"#)
                .is_ok()
        );
    }

    #[test]
    fn rejects_bad_backoff() {
        assert!(
            parse_config(r#"{"relay":{"reconnect":{"multiplier":0.5}},"feed":{"exchange":"binance"}}"#)
                .is_err()
        );
        assert!(
            parse_config(r#"{"relay":{"reconnect":{"jitter_factor":2.0}},"feed":{"exchange":"binance"}}"#)
                .is_err()
        );
    }
}
