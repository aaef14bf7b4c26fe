//! Scripted connector for tests.
//!
//! Each source has a queue of connect outcomes. A successful outcome hands the
//! test an unbounded sender that feeds frames into that transport. Live
//! transports are counted so tests can assert nothing leaked.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tick_core::error::RelayError;
use tick_core::transport::{Connector, Transport};
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum Frame {
    Text(String),
    Error(String),
    Close,
}

impl Frame {
    pub fn text(s: impl Into<String>) -> Self {
        Frame::Text(s.into())
    }

    pub fn trade(symbol: &str, price: f64) -> Self {
        Frame::Text(format!(r#"{{"e":"trade","s":"{symbol}","p":"{price}"}}"#))
    }
}

enum Step {
    Fail(String),
    ConfigError,
    Session(mpsc::UnboundedReceiver<Frame>),
    /// Connects, but `close()` never completes.
    StuckClose(mpsc::UnboundedReceiver<Frame>),
    Delayed(Duration, mpsc::UnboundedReceiver<Frame>),
}

#[derive(Default)]
pub struct ScriptedConnector {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    attempts: Mutex<HashMap<String, u32>>,
    open: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, source: &str, step: Step) {
        self.scripts.lock().entry(source.to_owned()).or_default().push_back(step);
    }

    pub fn push_fail(&self, source: &str, msg: &str) {
        self.push(source, Step::Fail(msg.to_owned()));
    }

    pub fn push_config_error(&self, source: &str) {
        self.push(source, Step::ConfigError);
    }

    pub fn push_session(&self, source: &str) -> mpsc::UnboundedSender<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(source, Step::Session(rx));
        tx
    }

    pub fn push_stuck_close_session(&self, source: &str) -> mpsc::UnboundedSender<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(source, Step::StuckClose(rx));
        tx
    }

    /// A connect that only completes after `delay`.
    pub fn push_delayed_session(&self, source: &str, delay: Duration) -> mpsc::UnboundedSender<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(source, Step::Delayed(delay, rx));
        tx
    }

    pub fn attempts(&self, source: &str) -> u32 {
        self.attempts.lock().get(source).copied().unwrap_or(0)
    }

    pub fn open_transports(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    fn transport(&self, frames: mpsc::UnboundedReceiver<Frame>, stuck_close: bool) -> Box<dyn Transport> {
        self.open.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedTransport {
            frames,
            open: Arc::clone(&self.open),
            closed: false,
            stuck_close,
        })
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, source: &str) -> Result<Box<dyn Transport>, RelayError> {
        *self.attempts.lock().entry(source.to_owned()).or_default() += 1;
        let step = self.scripts.lock().get_mut(source).and_then(VecDeque::pop_front);
        match step {
            Some(Step::Session(frames)) => Ok(self.transport(frames, false)),
            Some(Step::StuckClose(frames)) => Ok(self.transport(frames, true)),
            Some(Step::Delayed(delay, frames)) => {
                tokio::time::sleep(delay).await;
                Ok(self.transport(frames, false))
            }
            Some(Step::Fail(msg)) => Err(RelayError::Transport(msg)),
            Some(Step::ConfigError) => Err(RelayError::Config(format!("bad url for {source}"))),
            None => Err(RelayError::Transport(format!("no script for {source}"))),
        }
    }
}

struct ScriptedTransport {
    frames: mpsc::UnboundedReceiver<Frame>,
    open: Arc<AtomicUsize>,
    closed: bool,
    stuck_close: bool,
}

impl ScriptedTransport {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn recv(&mut self) -> Result<Option<String>, RelayError> {
        match self.frames.recv().await {
            Some(Frame::Text(s)) => Ok(Some(s)),
            Some(Frame::Error(e)) => Err(RelayError::Transport(e)),
            Some(Frame::Close) | None => Ok(None),
        }
    }

    async fn close(&mut self) {
        if self.stuck_close {
            std::future::pending::<()>().await;
        }
        self.frames.close();
        self.release();
    }
}

impl Drop for ScriptedTransport {
    fn drop(&mut self) {
        self.release();
    }
}
