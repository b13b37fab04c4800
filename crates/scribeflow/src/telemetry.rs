//! Tracing subscriber setup.
//!
//! Library code logs through the `log` facade and opens `tracing` spans around
//! job runs. `init_tracing` routes both into one `tracing-subscriber` registry.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::EngineError;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

fn build_env_filter(level: &str) -> Result<EnvFilter, EngineError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level)
        .map_err(|e| EngineError::Telemetry(format!("Invalid tracing filter '{}': {}", level, e)))
}

/// Installs the global subscriber. Returns `Ok(false)` if one was already
/// installed by an earlier call.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool, EngineError> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(false);
    }

    let filter = match build_env_filter(&config.level) {
        Ok(filter) => filter,
        Err(e) => {
            INITIALIZED.store(false, Ordering::SeqCst);
            return Err(e);
        }
    };

    // Bridge `log` records; ok() in case a logger is already set.
    tracing_log::LogTracer::init().ok();

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_span_list(true)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|e| EngineError::Telemetry(e.to_string()))?;

    tracing::debug!(level = %config.level, json = config.json, "Tracing initialized");
    Ok(true)
}
