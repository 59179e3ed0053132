//! # Structured Logging
//!
//! Environment-aware tracing setup. Plain console output by default; JSON
//! output when `PACS_ETL_LOG_JSON` is set, for log collectors.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber once.
///
/// Honors `RUST_LOG` for filtering (default `info`). Safe to call from
/// multiple entry points; later calls are no-ops, and an already-installed
/// global subscriber (e.g. from a test harness) is left in place.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let log_level =
            std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "info".to_string());
        let json_output = std::env::var("PACS_ETL_LOG_JSON")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let console_layer = (!json_output).then(|| {
            fmt::layer()
                .with_target(true)
                .with_filter(EnvFilter::new(log_level.clone()))
        });
        let json_layer = json_output.then(|| {
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::new(log_level.clone()))
        });

        let subscriber = tracing_subscriber::registry()
            .with(console_layer)
            .with(json_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already initialized");
        }
    });
}
