//! Tracing setup for the relay binaries.
//!
//! Console output always; a daily-rotating file when a log directory is
//! configured. The file writer is non-blocking, so the returned guard must be
//! held for the life of the process or buffered lines are lost.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// File prefix when `logging.module_name` is absent.
pub const DEFAULT_MODULE_NAME: &str = "tick-relay";

/// Level used when neither `RUST_LOG` nor the requested level parses.
const FALLBACK_DIRECTIVES: &str = "info";

/// Pick the filter directives: `RUST_LOG` wins if it parses, then the
/// requested level, then [`FALLBACK_DIRECTIVES`].
fn resolve_directives(from_env: Option<&str>, requested: &str) -> String {
    let parses = |d: &str| !d.trim().is_empty() && EnvFilter::try_new(d).is_ok();
    match from_env {
        Some(env) if parses(env) => env.to_string(),
        _ if parses(requested) => requested.to_string(),
        _ => FALLBACK_DIRECTIVES.to_string(),
    }
}

/// Install the global subscriber.
///
/// `log_dir` overrides `logging.log_path`. Call once, at startup.
pub fn init_logging(log_level: &str, logging: &LoggingConfig, log_dir: Option<&str>) -> Option<WorkerGuard> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directives = resolve_directives(env.as_deref(), log_level);

    let module_name = logging.module_name.as_deref().unwrap_or(DEFAULT_MODULE_NAME);
    let (file_layer, guard) = match log_dir.or(logging.log_path.as_deref()) {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, module_name));
            let layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(&directives))
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .init();

    tracing::debug!("logging initialized: filter={directives} module={module_name}");
    guard
}
