use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreError;
use crate::worker::job::{JobId, JobStatus, ModelRef};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Admission rejected: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Command rejected: {0}")]
    Command(#[from] CommandError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Structural reasons a submission is refused. Capacity is never one of them.
#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("No enabled transcription model is available")]
    NoEnabledModel,

    #[error("Transcription model '{model}' is not enabled")]
    ModelDisabled { model: ModelRef },

    #[error("Diarization model '{model}' is not enabled")]
    DiarizerDisabled { model: ModelRef },

    #[error("Diarization with '{model}' requested but no diarization provider is configured")]
    NoDiarizerProvider { model: ModelRef },

    #[error("Unsupported media '{source_ref}' ({mime})")]
    UnsupportedMedia { source_ref: String, mime: String },

    #[error("Engine is shutting down")]
    ShuttingDown,

    #[error("Failed to record job: {0}")]
    Store(#[from] StoreError),
}

/// Why a cancel/pause/resume/restart request was refused.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Cannot {command} job {job_id} while it is {status}")]
    InvalidState {
        job_id: JobId,
        status: JobStatus,
        command: &'static str,
    },

    #[error("Admission failed: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
