//! # tick-runner
//!
//! Serves the fan-in tick relay as a Server-Sent Events endpoint.
//!
//! Every HTTP client gets its own relay session over the configured symbols;
//! the session is cancelled as soon as the client disconnects.
//!
//! # Usage
//!
//! ```bash
//! tick-runner config.json --log-level info --bind 127.0.0.1:3000
//! curl -N http://127.0.0.1:3000/api/crypto
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use clap::Parser;
use futures_util::StreamExt;
use serde::Serialize;
use tick_core::Tick;
use tick_relay::{FanInRelay, RelayEvent};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Fan-in price tick relay.
#[derive(Parser)]
#[command(name = "tick-runner", about = "Fan-in price tick relay over SSE")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output (overrides `logging.log_path`).
    #[arg(long)]
    log_dir: Option<String>,

    /// Listen address (overrides `server.bind`).
    #[arg(long)]
    bind: Option<String>,
}

#[derive(Clone)]
struct AppState {
    relay: FanInRelay,
    sources: Arc<[String]>,
    shutdown: CancellationToken,
}

/// Wire shape of one SSE `data:` payload.
#[derive(Serialize)]
struct TickPayload<'a> {
    symbol: &'a str,
    price: f64,
}

impl<'a> From<&'a Tick> for TickPayload<'a> {
    fn from(tick: &'a Tick) -> Self {
        Self {
            symbol: &tick.symbol,
            price: tick.price,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = tick_core::config::load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // 2. Initialize logging
    let logging = config.logging.clone().unwrap_or_default();
    let _log_guard = tick_core::logging::init_logging(&cli.log_level, &logging, cli.log_dir.as_deref());

    info!("tick-runner starting: config={}, log_level={}", cli.config.display(), cli.log_level);

    // 3. Build the relay for the configured feed
    let (relay, sources) = tick_relay::registry::create_relay(&config)?;
    let server = config.server();
    let bind = cli.bind.unwrap_or_else(|| server.effective_bind());
    let path = server.effective_path();

    let shutdown = CancellationToken::new();
    let state = AppState {
        relay,
        sources: sources.into(),
        shutdown: shutdown.clone(),
    };
    let app = Router::new().route(&path, get(stream_ticks)).with_state(state);

    // 4. Serve until Ctrl+C
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!("listening on http://{bind}{path}, press Ctrl+C to stop");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for shutdown signal: {e}");
            }
            info!("shutdown signal received");
            // Open event streams end here, which drops their sessions.
            shutdown.cancel();
        })
        .await?;

    info!("server stopped, goodbye");
    Ok(())
}

/// `GET <path>`: one relay session per client, streamed as SSE.
async fn stream_ticks(State(state): State<AppState>) -> Response {
    let subscription = match state.relay.subscribe(state.sources.iter().cloned()) {
        Ok(sub) => sub,
        Err(e) => {
            error!("failed to open session: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };
    let id = subscription.id();
    info!("client connected: session-{id}");

    // Dropping the stream (client gone or server shutdown) drops the
    // subscription, which cancels the session.
    let events = subscription
        .take_until(state.shutdown.cancelled_owned())
        .filter_map(move |event| async move {
            match event {
                RelayEvent::Tick(tick) => Some(Event::default().json_data(TickPayload::from(&tick))),
                RelayEvent::Terminated(reason) => {
                    info!("session-{id} ended: {reason}");
                    None
                }
            }
        });

    (
        [(header::CACHE_CONTROL, "no-cache")],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response()
}
