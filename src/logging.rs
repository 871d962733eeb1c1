//! Structured logging initialization.
//!
//! Call one of these once at process startup, before the server runs. Reads
//! `VIX_LOG_LEVEL` for the default filter directive (overridable with the
//! usual `RUST_LOG` env var, since `EnvFilter` checks that first).

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize plain-text logging using `VIX_LOG_LEVEL` as the default directive.
pub fn init_logging(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(fmt::layer())
        .init();
}

/// Initialize logging with an explicit level, ignoring `VIX_LOG_LEVEL`.
pub fn init_logging_with_level(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::new(level))
        .with(fmt::layer())
        .init();
}

/// Initialize pretty multi-line logging (thread ids, targets, line numbers).
pub fn init_logging_pretty(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(
            fmt::layer()
                .pretty()
                .with_line_number(true)
                .with_thread_ids(true)
                .with_target(true),
        )
        .init();
}

/// Initialize JSON logging, suitable for log aggregators.
pub fn init_logging_json(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(fmt::layer().json())
        .init();
}

/// Initialize logging from a `Config`, dispatching to the right format.
pub fn init_from_config(cfg: &crate::config::Config) {
    use crate::config::LogFormat;
    match cfg.log_format {
        LogFormat::Plain => init_logging(&cfg.log_level),
        LogFormat::Pretty => init_logging_pretty(&cfg.log_level),
        LogFormat::Json => init_logging_json(&cfg.log_level),
    }
}
