//! Fan-in relay: N upstream sources merged into one subscriber stream.
//!
//! Each subscription spawns one task per source plus one driver task:
//!
//! ```text
//! FeedConnection ─► decode ─► rate limit ─┐
//! FeedConnection ─► decode ─► rate limit ─┼─► fan-in mpsc ─► driver ─► Subscription
//! FeedConnection ─► decode ─► rate limit ─┘
//! ```
//!
//! Per-source order is preserved end to end; there is no ordering across
//! sources. A decode failure drops one payload. A source that exhausts its
//! reconnect budget drops out while the others continue.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tick_core::config::RelayConfig;
use tick_core::error::RelayError;
use tick_core::transport::Connector;
use tick_core::{RateLimitMode, RateLimitPolicy};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::decoder::TickDecoder;
use crate::feed::{FeedConnection, FeedStats};
use crate::rate_limit::RateLimiter;
use crate::reconnect::ReconnectConfig;
use crate::session::{self, SessionShared, SourceEvent, Subscription};

/// Resolved per-session tuning.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub channel_capacity: usize,
    pub close_grace: Duration,
    pub rate_limit: RateLimitPolicy,
    pub reconnect: ReconnectConfig,
}

impl RelaySettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            channel_capacity: config.effective_channel_capacity().max(1),
            close_grace: config.effective_close_grace(),
            rate_limit: config.rate_limit_policy(),
            reconnect: ReconnectConfig::from_settings(&config.reconnect_settings()),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

/// Entry point. Cheap to clone; every subscription is independent.
#[derive(Clone)]
pub struct FanInRelay {
    settings: RelaySettings,
    connector: Arc<dyn Connector>,
    decoder: Arc<dyn TickDecoder>,
    next_session: Arc<AtomicU64>,
}

impl FanInRelay {
    pub fn new(settings: RelaySettings, connector: Arc<dyn Connector>, decoder: Arc<dyn TickDecoder>) -> Self {
        Self {
            settings,
            connector,
            decoder,
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Open one connection per source and start relaying.
    ///
    /// Must be called from within a Tokio runtime. Fails only on invalid
    /// input; connection problems surface through source state and, if every
    /// source gives up, the session's termination event.
    pub fn subscribe<I, S>(&self, sources: I) -> Result<Subscription, RelayError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sources: Vec<String> = sources.into_iter().map(Into::into).collect();
        if sources.is_empty() {
            return Err(RelayError::Config("at least one source is required".into()));
        }
        let mut seen = HashSet::with_capacity(sources.len());
        for source in &sources {
            if source.trim().is_empty() {
                return Err(RelayError::Config("empty source identifier".into()));
            }
            if !seen.insert(source.as_str()) {
                return Err(RelayError::Config(format!("duplicate source: {source}")));
            }
        }

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let limiter = Arc::new(RateLimiter::new(self.settings.rate_limit));
        let (in_tx, in_rx) = mpsc::channel(self.settings.channel_capacity);
        let (out_tx, out_rx) = mpsc::channel(self.settings.channel_capacity);

        let mut feeds = Vec::with_capacity(sources.len());
        let mut tasks = Vec::with_capacity(sources.len());
        for (index, source) in sources.iter().enumerate() {
            let (feed, handle) = FeedConnection::open(
                source.as_str(),
                Arc::clone(&self.connector),
                self.settings.reconnect.clone(),
                cancel.child_token(),
            );
            tasks.push(tokio::spawn(run_source(
                index,
                feed,
                Arc::clone(&self.decoder),
                Arc::clone(&limiter),
                in_tx.clone(),
            )));
            feeds.push(handle);
        }
        drop(in_tx);

        let shared = Arc::new(SessionShared::new(id, cancel, feeds));
        tokio::spawn(session::drive(
            Arc::clone(&shared),
            in_rx,
            out_tx,
            tasks,
            self.settings.close_grace,
        ));

        let mode = match self.settings.rate_limit.mode {
            RateLimitMode::Off => "off".to_string(),
            RateLimitMode::Global => format!("global/{:?}", self.settings.rate_limit.interval),
            RateLimitMode::PerSymbol => format!("per_symbol/{:?}", self.settings.rate_limit.interval),
        };
        info!("[session-{id}] started: sources={sources:?} rate_limit={mode}");

        Ok(Subscription::new(shared, out_rx))
    }
}

/// Pump one source until it closes or gives up.
async fn run_source(
    index: usize,
    mut feed: FeedConnection,
    decoder: Arc<dyn TickDecoder>,
    limiter: Arc<RateLimiter>,
    tx: mpsc::Sender<SourceEvent>,
) {
    let stats = feed.stats();
    let cancel = feed.cancel_token().clone();

    loop {
        let raw = match feed.next_message().await {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(error) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tx.send(SourceEvent::Exhausted { source: index, error }) => {}
                }
                break;
            }
        };

        let tick = match decoder.decode(&raw) {
            Ok(tick) => tick,
            Err(e) => {
                FeedStats::bump(&stats.decode_errors);
                debug!("[{}] dropped payload: {e}", feed.source());
                continue;
            }
        };

        if !limiter.admit(&tick, Instant::now()) {
            FeedStats::bump(&stats.throttled);
            continue;
        }

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = tx.send(SourceEvent::Tick(tick)) => r,
        };
        if sent.is_err() {
            break;
        }
        FeedStats::bump(&stats.admitted);
    }

    feed.close().await;
}
