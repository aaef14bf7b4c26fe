//! One upstream source: connection, reconnect, close.
//!
//! A [`FeedConnection`] is a pull-driven state machine. Each call to
//! [`FeedConnection::next_message`] connects if needed, waits for the next
//! payload, and on transport failure swaps a fresh transport into the same
//! slot after a backoff delay. Callers keep the same connection object across
//! reconnects.
//!
//! ```text
//! Connecting ──ok──► Open ──error/peer close──► Reconnecting ──► Connecting
//!      │                                             │
//!      └──fail──► Reconnecting ──budget spent──► Closed (SourceExhausted)
//! any state ──close()/cancel──► Closing ──► Closed
//! ```
//!
//! The observable side is a [`FeedHandle`]: state, counters, and `close()`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tick_core::FeedState;
use tick_core::error::RelayError;
use tick_core::transport::{Connector, Transport};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::reconnect::{ReconnectConfig, ReconnectPolicy};

/// Upper bound on a graceful transport close before it is simply dropped.
const TRANSPORT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-source counters, shared between the source task and its handle.
#[derive(Debug, Default)]
pub struct FeedStats {
    pub received: AtomicU64,
    pub decode_errors: AtomicU64,
    pub throttled: AtomicU64,
    pub admitted: AtomicU64,
    pub reconnects: AtomicU64,
}

impl FeedStats {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FeedStatsSnapshot {
        FeedStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStatsSnapshot {
    pub received: u64,
    pub decode_errors: u64,
    pub throttled: u64,
    pub admitted: u64,
    pub reconnects: u64,
}

impl std::fmt::Display for FeedStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received={} admitted={} throttled={} decode_errors={} reconnects={}",
            self.received, self.admitted, self.throttled, self.decode_errors, self.reconnects
        )
    }
}

/// Owner side of one upstream source.
pub struct FeedConnection {
    source: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    /// Current transport. Reconnects replace the contents, never the owner.
    transport: Option<Box<dyn Transport>>,
    state: watch::Sender<FeedState>,
    cancel: CancellationToken,
    stats: Arc<FeedStats>,
    /// Set after any failure; the next attempt waits out a backoff delay.
    retrying: bool,
    ever_connected: bool,
}

/// Observer side of one upstream source. Cheap to clone.
#[derive(Clone)]
pub struct FeedHandle {
    source: Arc<str>,
    state: watch::Receiver<FeedState>,
    cancel: CancellationToken,
    stats: Arc<FeedStats>,
}

impl FeedConnection {
    /// Create the connection for `source`. Nothing is dialed until the first
    /// [`next_message`](Self::next_message) call.
    ///
    /// Cancelling `cancel` (or any parent token) closes the connection.
    pub fn open(
        source: impl Into<String>,
        connector: Arc<dyn Connector>,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> (Self, FeedHandle) {
        let source = source.into();
        let (state_tx, state_rx) = watch::channel(FeedState::Connecting);
        let stats = Arc::new(FeedStats::default());

        let handle = FeedHandle {
            source: Arc::from(source.as_str()),
            state: state_rx,
            cancel: cancel.clone(),
            stats: Arc::clone(&stats),
        };

        let conn = Self {
            source,
            connector,
            policy: ReconnectPolicy::new(reconnect),
            transport: None,
            state: state_tx,
            cancel,
            stats,
            retrying: false,
            ever_connected: false,
        };
        (conn, handle)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn state(&self) -> FeedState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> Arc<FeedStats> {
        Arc::clone(&self.stats)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Next raw payload from upstream.
    ///
    /// - `Ok(Some(_))`: a payload.
    /// - `Ok(None)`: the connection was closed; no more payloads will come.
    /// - `Err(SourceExhausted)`: reconnect budget spent; state is `Closed`.
    pub async fn next_message(&mut self) -> Result<Option<String>, RelayError> {
        loop {
            if self.cancel.is_cancelled() {
                self.shutdown().await;
                return Ok(None);
            }
            if self.state().is_closed() {
                return Ok(None);
            }

            let Some(transport) = self.transport.as_mut() else {
                self.establish().await?;
                continue;
            };

            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => continue,
                r = transport.recv() => r,
            };

            match received {
                Ok(Some(payload)) => {
                    FeedStats::bump(&self.stats.received);
                    return Ok(Some(payload));
                }
                Ok(None) => {
                    warn!("[{}] connection closed by peer", self.source);
                    self.discard_transport().await;
                }
                Err(e) => {
                    warn!("[{}] transport error: {e}", self.source);
                    self.discard_transport().await;
                }
            }
        }
    }

    /// Close the connection. Idempotent; returns once the state is `Closed`.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        self.shutdown().await;
    }

    /// Dial until a transport is installed, the budget runs out, or the
    /// connection is cancelled (returns `Ok` and leaves the slot empty).
    async fn establish(&mut self) -> Result<(), RelayError> {
        loop {
            if self.retrying {
                let Some(delay) = self.policy.next_delay() else {
                    let attempts = self.policy.attempt_count();
                    error!("[{}] giving up after {attempts} reconnect attempts", self.source);
                    self.set_state(FeedState::Closed);
                    return Err(RelayError::SourceExhausted {
                        source_id: self.source.clone(),
                        attempts,
                    });
                };

                let attempt = self.policy.attempt_count();
                let next_attempt_at = Instant::now() + delay;
                self.set_state(FeedState::Reconnecting { attempt, next_attempt_at });
                warn!("[{}] reconnecting in {delay:?} (attempt {attempt})", self.source);

                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep_until(next_attempt_at) => {}
                }
            }

            self.set_state(FeedState::Connecting);
            let result = tokio::select! {
                biased;
                // Dropping the in-flight attempt releases whatever it had opened.
                _ = self.cancel.cancelled() => return Ok(()),
                r = self.connector.connect(&self.source) => r,
            };

            match result {
                Ok(mut transport) => {
                    if self.cancel.is_cancelled() {
                        transport.close().await;
                        return Ok(());
                    }
                    if self.ever_connected {
                        FeedStats::bump(&self.stats.reconnects);
                    }
                    self.transport = Some(transport);
                    self.policy.reset();
                    self.retrying = false;
                    self.ever_connected = true;
                    self.set_state(FeedState::Open);
                    info!("[{}] open", self.source);
                    return Ok(());
                }
                Err(e @ RelayError::Config(_)) => {
                    // A bad URL or header will not fix itself.
                    error!("[{}] {e}", self.source);
                    self.set_state(FeedState::Closed);
                    return Err(RelayError::SourceExhausted {
                        source_id: self.source.clone(),
                        attempts: self.policy.attempt_count(),
                    });
                }
                Err(e) => {
                    warn!("[{}] connect failed: {e}", self.source);
                    self.retrying = true;
                }
            }
        }
    }

    async fn discard_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if tokio::time::timeout(TRANSPORT_CLOSE_TIMEOUT, transport.close()).await.is_err() {
                debug!("[{}] transport close timed out, dropping", self.source);
            }
        }
        self.retrying = true;
    }

    async fn shutdown(&mut self) {
        if self.state().is_closed() {
            return;
        }
        self.set_state(FeedState::Closing);
        if let Some(mut transport) = self.transport.take() {
            if tokio::time::timeout(TRANSPORT_CLOSE_TIMEOUT, transport.close()).await.is_err() {
                debug!("[{}] transport close timed out, dropping", self.source);
            }
        }
        self.set_state(FeedState::Closed);
        info!("[{}] closed", self.source);
    }

    fn set_state(&self, next: FeedState) {
        debug!("[{}] state -> {next}", self.source);
        self.state.send_replace(next);
    }
}

impl Drop for FeedConnection {
    fn drop(&mut self) {
        // The transport is dropped with us; observers must not see a live state.
        if !self.state().is_closed() {
            debug!("[{}] dropped while {}", self.source, self.state());
            self.state.send_replace(FeedState::Closed);
        }
    }
}

impl FeedHandle {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn state(&self) -> FeedState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> FeedStatsSnapshot {
        self.stats.snapshot()
    }

    /// Request close and wait until the owner reports `Closed`.
    ///
    /// Idempotent. Requires the owning task to still be polling its
    /// connection; the session bounds this wait with its close grace.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.closed().await;
    }

    /// Wait until the connection reaches `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // Err means the owner is gone, and its Drop already published Closed.
        let _ = state.wait_for(FeedState::is_closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Frame, ScriptedConnector};

    fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    fn open(connector: &Arc<ScriptedConnector>, max_attempts: u32) -> (FeedConnection, FeedHandle) {
        FeedConnection::open(
            "btcusdt",
            Arc::clone(connector) as Arc<dyn Connector>,
            fast_reconnect(max_attempts),
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn yields_messages_in_order() {
        let connector = ScriptedConnector::new();
        let tx = connector.push_session("btcusdt");
        tx.send(Frame::text("a")).unwrap();
        tx.send(Frame::text("b")).unwrap();

        let (mut feed, handle) = open(&connector, 3);
        assert_eq!(feed.next_message().await.unwrap().as_deref(), Some("a"));
        assert_eq!(feed.next_message().await.unwrap().as_deref(), Some("b"));
        assert_eq!(handle.state(), FeedState::Open);
        assert_eq!(handle.stats().received, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_transparently_after_error() {
        let connector = ScriptedConnector::new();
        let first = connector.push_session("btcusdt");
        let second = connector.push_session("btcusdt");
        first.send(Frame::text("before")).unwrap();
        first.send(Frame::Error("reset".into())).unwrap();
        second.send(Frame::text("after")).unwrap();

        let (mut feed, handle) = open(&connector, 3);
        assert_eq!(feed.next_message().await.unwrap().as_deref(), Some("before"));
        assert_eq!(feed.next_message().await.unwrap().as_deref(), Some("after"));
        assert_eq!(connector.attempts("btcusdt"), 2);
        assert_eq!(connector.open_transports(), 1);
        assert_eq!(handle.stats().reconnects, 1);
        assert_eq!(handle.state(), FeedState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_close_routes_to_reconnecting() {
        let connector = ScriptedConnector::new();
        let first = connector.push_session("btcusdt");
        first.send(Frame::Close).unwrap();

        let (mut feed, handle) = open(&connector, 3);
        let pull = tokio::spawn(async move {
            let msg = feed.next_message().await;
            (feed, msg)
        });

        let mut state = handle.state.clone();
        state
            .wait_for(|s| matches!(s, FeedState::Reconnecting { attempt: 1, .. }))
            .await
            .unwrap();

        let second = connector.push_session("btcusdt");
        second.send(Frame::text("back")).unwrap();
        let (_feed, msg) = pull.await.unwrap();
        assert_eq!(msg.unwrap().as_deref(), Some("back"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_budget() {
        let connector = ScriptedConnector::new();
        for _ in 0..4 {
            connector.push_fail("btcusdt", "refused");
        }

        let (mut feed, handle) = open(&connector, 3);
        let err = feed.next_message().await.unwrap_err();
        assert!(matches!(err, RelayError::SourceExhausted { attempts: 3, .. }));
        // initial attempt + 3 retries
        assert_eq!(connector.attempts("btcusdt"), 4);
        assert_eq!(handle.state(), FeedState::Closed);
        assert!(feed.next_message().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn config_error_is_not_retried() {
        let connector = ScriptedConnector::new();
        connector.push_config_error("btcusdt");

        let (mut feed, _handle) = open(&connector, 0);
        let err = feed.next_message().await.unwrap_err();
        assert!(matches!(err, RelayError::SourceExhausted { .. }));
        assert_eq!(connector.attempts("btcusdt"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent_and_releases_transport() {
        let connector = ScriptedConnector::new();
        let _tx = connector.push_session("btcusdt");

        let (mut feed, handle) = open(&connector, 3);
        let pull = tokio::spawn(async move {
            let first = feed.next_message().await;
            feed.close().await;
            feed.close().await;
            (feed, first)
        });

        let mut state = handle.state.clone();
        state.wait_for(|s| *s == FeedState::Open).await.unwrap();
        assert_eq!(connector.open_transports(), 1);

        handle.close().await;
        handle.close().await;
        let (_feed, first) = pull.await.unwrap();
        assert!(first.unwrap().is_none());
        assert_eq!(handle.state(), FeedState::Closed);
        assert_eq!(connector.open_transports(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_backoff_cancels_reconnect() {
        let connector = ScriptedConnector::new();
        let first = connector.push_session("btcusdt");
        first.send(Frame::Error("reset".into())).unwrap();
        let _second = connector.push_session("btcusdt");

        let mut config = fast_reconnect(3);
        config.initial_delay = Duration::from_secs(30);
        let (mut feed, handle) = FeedConnection::open(
            "btcusdt",
            Arc::clone(&connector) as Arc<dyn Connector>,
            config,
            CancellationToken::new(),
        );
        let pull = tokio::spawn(async move { feed.next_message().await.map(|m| m.is_none()) });

        let mut state = handle.state.clone();
        state
            .wait_for(|s| matches!(s, FeedState::Reconnecting { .. }))
            .await
            .unwrap();
        handle.close().await;

        assert!(pull.await.unwrap().unwrap());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts("btcusdt"), 1);
        assert_eq!(connector.open_transports(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_connect_leaves_no_transport() {
        let connector = ScriptedConnector::new();
        let _tx = connector.push_delayed_session("btcusdt", Duration::from_secs(10));

        let (mut feed, handle) = open(&connector, 3);
        let pull = tokio::spawn(async move { feed.next_message().await.map(|m| m.is_none()) });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.state(), FeedState::Connecting);
        handle.close().await;
        assert!(pull.await.unwrap().unwrap());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(connector.open_transports(), 0);
        assert_eq!(handle.state(), FeedState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_publishes_closed() {
        let connector = ScriptedConnector::new();
        let (feed, handle) = open(&connector, 3);
        drop(feed);
        assert!(handle.state().is_closed());
        handle.closed().await;
    }
}
