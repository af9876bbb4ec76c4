//! Structured logging setup: TRACE..FATAL levels with an optional
//! correlation ID, grounded on `sisctl`'s `tracing_subscriber::registry()`
//! initialization.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global `tracing` subscriber. Call once at process start.
pub fn init(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,plantctl={}", cfg.level)));

    let registry = tracing_subscriber::registry().with(filter);

    if cfg.json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Generate a fresh correlation ID (36-char hyphenated UUID v4), per the
/// logging interface's "thread-local correlation ID (UUID-shaped string)".
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Open a span carrying `id` as a `correlation_id` field. Entering the
/// returned span attaches the ID to every event logged within it, standing
/// in for the thread-local correlation ID named in §6 of the spec.
pub fn correlation_span(id: &str) -> tracing::Span {
    tracing::info_span!("request", correlation_id = %id)
}

/// Log a FATAL-severity line. `tracing` has no native FATAL level, so this
/// logs at ERROR with a `fatal = true` field, matching the spec's five-level
/// TRACE/DEBUG/INFO/WARN/ERROR set plus FATAL as an aborting variant of ERROR.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {
        tracing::error!(fatal = true, $($arg)*)
    };
}
