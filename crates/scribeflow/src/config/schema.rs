use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Number of jobs allowed to hold a worker slot at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Seconds without a progress callback before a job is annotated as stalled.
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    #[serde(default = "default_stall_check_interval_ms")]
    pub stall_check_interval_ms: u64,
    /// Minimum spacing between percent-only row writes. Stage changes and
    /// status transitions are always written immediately.
    #[serde(default = "default_progress_persist_interval_ms")]
    pub progress_persist_interval_ms: u64,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    /// Where finalized transcripts are written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<PathBuf>,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_max_concurrency() -> usize {
    (num_cpus::get() / 2).max(1)
}

fn default_stall_timeout_secs() -> u64 {
    120
}

fn default_stall_check_interval_ms() -> u64 {
    1000
}

fn default_progress_persist_interval_ms() -> u64 {
    500
}

fn default_broadcast_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            stall_timeout_secs: default_stall_timeout_secs(),
            stall_check_interval_ms: default_stall_check_interval_ms(),
            progress_persist_interval_ms: default_progress_persist_interval_ms(),
            broadcast_capacity: default_broadcast_capacity(),
            database_path: None,
            output_directory: None,
            models: ModelsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn stall_check_interval(&self) -> Duration {
        Duration::from_millis(self.stall_check_interval_ms)
    }

    pub fn progress_persist_interval(&self) -> Duration {
        Duration::from_millis(self.progress_persist_interval_ms)
    }

    /// Configured database path, or the per-user default.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

/// Model registry: which weights exist and whether they may be used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub transcription: Vec<ModelEntry>,
    #[serde(default)]
    pub diarization: Vec<ModelEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub provider: String,
    pub model: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ModelEntry {
    pub fn enabled(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            enabled: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
