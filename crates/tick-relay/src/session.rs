//! Subscription session lifecycle.
//!
//! A session owns one feed per source and a single driver task that merges
//! their ticks onto the subscriber's channel. The session state lives in a
//! `watch` cell and every transition is a compare-and-set against
//! [`SessionState::can_transition_to`], so racing cancel paths (reader
//! cancel, reader drop, all sources exhausted) resolve to one winner.
//!
//! Teardown runs only inside the driver task, which is why the termination
//! event is delivered exactly once.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use parking_lot::Mutex;
use tick_core::{FeedState, SessionState, TerminationReason, Tick};
use tick_core::error::RelayError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::feed::{FeedHandle, FeedStatsSnapshot};

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Tick(Tick),
    /// Last event of every session.
    Terminated(TerminationReason),
}

/// Messages from source tasks to the driver.
#[derive(Debug)]
pub(crate) enum SourceEvent {
    Tick(Tick),
    Exhausted { source: usize, error: RelayError },
}

/// Per-source view exposed to the subscriber.
#[derive(Debug, Clone)]
pub struct SourceStatus {
    pub source: String,
    pub state: FeedState,
    pub stats: FeedStatsSnapshot,
}

pub(crate) struct SessionShared {
    id: u64,
    state: watch::Sender<SessionState>,
    reason: Mutex<Option<TerminationReason>>,
    cancel: CancellationToken,
    feeds: Vec<FeedHandle>,
}

impl SessionShared {
    pub(crate) fn new(id: u64, cancel: CancellationToken, feeds: Vec<FeedHandle>) -> Self {
        let (state, _) = watch::channel(SessionState::Active);
        Self {
            id,
            state,
            reason: Mutex::new(None),
            cancel,
            feeds,
        }
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn transition(&self, next: SessionState) -> bool {
        self.state.send_if_modified(|cur| {
            if cur.can_transition_to(next) {
                *cur = next;
                true
            } else {
                false
            }
        })
    }

    /// Move `Active → Cancelling` and fire the cancel token.
    ///
    /// The first caller records the termination reason; later callers only
    /// re-fire the (idempotent) token.
    fn begin_cancel(&self, reason: TerminationReason) -> bool {
        let won = {
            let mut slot = self.reason.lock();
            let won = self.transition(SessionState::Cancelling);
            if won {
                *slot = Some(reason);
            }
            won
        };
        if won {
            info!("[session-{}] cancelling: {reason}", self.id);
        }
        self.cancel.cancel();
        won
    }

    fn reason(&self) -> TerminationReason {
        self.reason.lock().unwrap_or(TerminationReason::Cancelled)
    }
}

/// The driver: forward ticks while active, then tear down once.
pub(crate) async fn drive(
    shared: Arc<SessionShared>,
    mut inbound: mpsc::Receiver<SourceEvent>,
    outbound: mpsc::Sender<Tick>,
    tasks: Vec<JoinHandle<()>>,
    close_grace: Duration,
) {
    let mut live = vec![true; shared.feeds.len()];
    let mut remaining = live.len();

    let reason = loop {
        let event = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break shared.reason(),
            ev = inbound.recv() => ev,
        };

        match event {
            Some(SourceEvent::Tick(tick)) => {
                if shared.state() != SessionState::Active {
                    continue;
                }
                let sent = tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => break shared.reason(),
                    r = outbound.send(tick) => r,
                };
                if sent.is_err() {
                    break TerminationReason::ReaderGone;
                }
            }
            Some(SourceEvent::Exhausted { source, error }) => {
                warn!("[session-{}] source {} removed: {error}", shared.id, shared.feeds[source].source());
                if std::mem::replace(&mut live[source], false) {
                    remaining -= 1;
                }
                if remaining == 0 {
                    break TerminationReason::AllSourcesExhausted;
                }
            }
            // Every source task has exited without being cancelled.
            None => break TerminationReason::AllSourcesExhausted,
        }
    };

    shared.begin_cancel(reason);
    let reason = shared.reason();
    drop(inbound);

    teardown(&shared, tasks, close_grace).await;

    shared.transition(SessionState::Closed);
    info!("[session-{}] closed: {reason}", shared.id);
    // Dropping `outbound` ends the subscriber's stream; it then yields the
    // termination event.
    drop(outbound);
}

async fn teardown(shared: &SessionShared, tasks: Vec<JoinHandle<()>>, close_grace: Duration) {
    let closing = futures_util::future::join_all(shared.feeds.iter().map(|feed| feed.close()));
    if tokio::time::timeout(close_grace, closing).await.is_err() {
        warn!("[session-{}] sources did not close within {close_grace:?}, aborting", shared.id);
        for task in &tasks {
            task.abort();
        }
    }
    for task in tasks {
        // Aborted tasks drop their connection, which publishes Closed.
        let _ = task.await;
    }
    for feed in &shared.feeds {
        info!("[session-{}] {} {}", shared.id, feed.source(), feed.stats());
    }
}

/// Reader side of a session.
///
/// Yields [`RelayEvent::Tick`] while the session is active, then exactly one
/// [`RelayEvent::Terminated`], then ends. Dropping it cancels the session.
pub struct Subscription {
    shared: Arc<SessionShared>,
    ticks: mpsc::Receiver<Tick>,
    finished: bool,
}

impl Subscription {
    pub(crate) fn new(shared: Arc<SessionShared>, ticks: mpsc::Receiver<Tick>) -> Self {
        Self {
            shared,
            ticks,
            finished: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// `Err(SessionTerminated)` once the session has left `Active`.
    pub fn ensure_active(&self) -> Result<(), RelayError> {
        match self.shared.state() {
            SessionState::Active => Ok(()),
            state => Err(RelayError::SessionTerminated(format!(
                "session-{} is {state}",
                self.shared.id
            ))),
        }
    }

    /// Per-source state and counters, in subscription order.
    pub fn sources(&self) -> Vec<SourceStatus> {
        self.shared
            .feeds
            .iter()
            .map(|feed| SourceStatus {
                source: feed.source().to_owned(),
                state: feed.state(),
                stats: feed.stats(),
            })
            .collect()
    }

    pub fn source_states(&self) -> Vec<(String, FeedState)> {
        self.shared
            .feeds
            .iter()
            .map(|feed| (feed.source().to_owned(), feed.state()))
            .collect()
    }

    pub fn source_stats(&self) -> Vec<(String, FeedStatsSnapshot)> {
        self.shared
            .feeds
            .iter()
            .map(|feed| (feed.source().to_owned(), feed.stats()))
            .collect()
    }

    /// Stop the session and wait until every source is closed.
    ///
    /// Idempotent. No tick is delivered once this has been called.
    pub async fn cancel(&self) {
        self.shared.begin_cancel(TerminationReason::Cancelled);
        self.closed().await;
    }

    /// Wait until the session reaches `Closed`.
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }

    /// Next event; `None` after the termination event.
    pub async fn next_event(&mut self) -> Option<RelayEvent> {
        futures_util::StreamExt::next(self).await
    }
}

impl Stream for Subscription {
    type Item = RelayEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RelayEvent>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        loop {
            match this.ticks.poll_recv(cx) {
                Poll::Ready(Some(tick)) => {
                    // Buffered ticks are discarded once the session stops being active.
                    if this.shared.state() == SessionState::Active {
                        return Poll::Ready(Some(RelayEvent::Tick(tick)));
                    }
                    debug!("[session-{}] discarding {tick} after cancel", this.shared.id);
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    return Poll::Ready(Some(RelayEvent::Terminated(this.shared.reason())));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.begin_cancel(TerminationReason::ReaderGone);
    }
}
