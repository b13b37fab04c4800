//! Provider adapter boundary.
//!
//! Inference, media storage and transcript storage live outside the engine.
//! Each is reached through one of the traits below; every call blocks the
//! calling worker until it returns and reports incremental progress through a
//! [`ProgressSink`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::worker::job::{Job, ModelRef};

pub mod catalog;
pub mod local;
pub mod transcript;

pub use catalog::{ConfigModelCatalog, ModelCatalog};
pub use local::{JsonTranscriptSink, LocalFileResolver};
pub use transcript::assign_speakers;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Backend failure; the message is stored on the job verbatim.
    #[error("{0}")]
    Failed(String),

    /// The adapter gave up because the engine no longer awaits it.
    #[error("Provider call cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Callback handed to every provider call.
pub trait ProgressSink: Send + Sync {
    /// `percent` is the stage's own sub-progress. Values outside 0..=100 are
    /// clamped by the receiver. `eta_seconds` is optional provider advice.
    fn report(&self, percent: f32, eta_seconds: Option<f64>);
}

/// Sink that drops every report.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _percent: f32, _eta_seconds: Option<f64>) {}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl TranscriptSegment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            speaker: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptResult {
    pub segments: Vec<TranscriptSegment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerSegment {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
}

/// Turns a job's `source_ref` into a local media path (the `uploading` stage).
pub trait SourceResolver: Send + Sync {
    fn resolve(&self, source_ref: &str, progress: &dyn ProgressSink) -> Result<PathBuf, ProviderError>;
}

pub trait Transcriber: Send + Sync {
    fn transcribe(
        &self,
        source: &Path,
        model: &ModelRef,
        progress: &dyn ProgressSink,
    ) -> Result<TranscriptResult, ProviderError>;
}

pub trait Diarizer: Send + Sync {
    fn diarize(
        &self,
        source: &Path,
        model: &ModelRef,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<SpeakerSegment>, ProviderError>;
}

/// Persists a finished transcript and returns where it went.
pub trait TranscriptSink: Send + Sync {
    fn store(&self, job: &Job, transcript: &TranscriptResult) -> Result<PathBuf, ProviderError>;
}
