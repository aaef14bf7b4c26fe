//! Single WebSocket connection with ping keep-alive.
//!
//! [`WsConnector`] performs one TLS handshake per call; reconnect policy lives
//! in the feed connection that owns it. Each [`WsTransport`]:
//! 1. Reads frames and yields text payloads.
//! 2. Answers server pings and optionally sends its own on an interval.
//! 3. Reports close frames and stream end as `Ok(None)`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::transport::{Connector, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Placeholder substituted with the source identifier in `url_template`.
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// Configuration shared by every connection a [`WsConnector`] opens.
#[derive(Debug, Clone)]
pub struct WsConnConfig {
    /// URL with a `{source}` placeholder
    /// (e.g. `wss://stream.binance.com:9443/ws/{source}@trade`).
    pub url_template: String,
    /// Extra HTTP headers for the handshake.
    pub extra_headers: HashMap<String, String>,
    /// Interval between client ping frames.
    pub ping_interval: Option<Duration>,
    /// Upper bound on a single handshake.
    pub connect_timeout: Duration,
}

impl WsConnConfig {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            extra_headers: HashMap::new(),
            ping_interval: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Resolve and validate the URL for one source.
    pub fn url_for(&self, source: &str) -> Result<url::Url, RelayError> {
        let raw = self.url_template.replace(SOURCE_PLACEHOLDER, source);
        url::Url::parse(&raw).map_err(|e| RelayError::Config(format!("bad feed url {raw}: {e}")))
    }
}

/// Opens WebSocket transports.
#[derive(Debug, Clone)]
pub struct WsConnector {
    config: WsConnConfig,
}

impl WsConnector {
    pub fn new(config: WsConnConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WsConnConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, source: &str) -> Result<Box<dyn Transport>, RelayError> {
        let url = self.config.url_for(source)?;
        info!("[ws-{source}] connecting to {url}");

        let mut request = url.as_str().into_client_request()?;
        for (key, value) in &self.config.extra_headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| RelayError::Config(format!("bad header name {key}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RelayError::Config(format!("bad header value for {key}: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (stream, _response) =
            tokio::time::timeout(self.config.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| RelayError::Transport(format!("connect timed out after {:?}", self.config.connect_timeout)))??;

        info!("[ws-{source}] connected");
        Ok(Box::new(WsTransport::new(source.to_string(), stream, self.config.ping_interval)))
    }
}

/// A connected WebSocket.
pub struct WsTransport {
    label: String,
    stream: WsStream,
    ping: Option<tokio::time::Interval>,
    closed: bool,
}

impl WsTransport {
    fn new(label: String, stream: WsStream, ping_interval: Option<Duration>) -> Self {
        let ping = ping_interval.map(|d| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + d, d);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });
        Self { label, stream, ping, closed: false }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn recv(&mut self) -> Result<Option<String>, RelayError> {
        let Self { label, stream, ping, closed } = self;
        if *closed {
            return Ok(None);
        }

        loop {
            let ping_tick = async {
                match ping.as_mut() {
                    Some(interval) => {
                        interval.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            let frame = tokio::select! {
                msg = stream.next() => Some(msg),
                _ = ping_tick => None,
            };

            match frame {
                Some(Some(Ok(Message::Text(text)))) => return Ok(Some(text.as_str().to_owned())),
                Some(Some(Ok(Message::Binary(data)))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => debug!("[ws-{label}] dropped non-utf8 binary frame"),
                },
                Some(Some(Ok(Message::Ping(data)))) => {
                    stream.send(Message::Pong(data)).await?;
                }
                Some(Some(Ok(Message::Close(frame)))) => {
                    warn!("[ws-{label}] received close frame: {frame:?}");
                    *closed = true;
                    return Ok(None);
                }
                Some(Some(Err(e))) => {
                    *closed = true;
                    return Err(e.into());
                }
                Some(None) => {
                    warn!("[ws-{label}] stream ended");
                    *closed = true;
                    return Ok(None);
                }
                Some(Some(Ok(_))) => {} // Pong, Frame
                None => {
                    stream.send(Message::Ping(Vec::new().into())).await?;
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.close(None).await {
            debug!("[ws-{}] close: {e}", self.label);
        }
    }
}
