use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque job identifier (UUID v4 string).
pub type JobId = String;

/// Lifecycle status of a job. See [`crate::worker::state`] for legal edges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Pausing,
    Paused,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Pausing,
        JobStatus::Paused,
        JobStatus::Cancelling,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Pausing => "pausing",
            JobStatus::Paused => "paused",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states have no outgoing edges.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Statuses in which a worker slot is held.
    pub fn holds_worker(&self) -> bool {
        matches!(
            self,
            JobStatus::Processing | JobStatus::Pausing | JobStatus::Cancelling
        )
    }

    /// Statuses in which `progress_percent` carries meaning.
    pub fn has_progress(&self) -> bool {
        self.holds_worker() || *self == JobStatus::Paused
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

/// Pipeline stage label. `Stalled` is a progress annotation, not a status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Uploading,
    Transcribing,
    Diarizing,
    Finalizing,
    Stalled,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Uploading => "uploading",
            Stage::Transcribing => "transcribing",
            Stage::Diarizing => "diarizing",
            Stage::Finalizing => "finalizing",
            Stage::Stalled => "stalled",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(Stage::Uploading),
            "transcribing" => Ok(Stage::Transcribing),
            "diarizing" => Ok(Stage::Diarizing),
            "finalizing" => Ok(Stage::Finalizing),
            "stalled" => Ok(Stage::Stalled),
            other => Err(format!("unknown stage '{}'", other)),
        }
    }
}

/// A provider/model pair, e.g. `whisper` / `large-v3`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Models chosen at submission. Immutable for the lifetime of the job row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelSelection {
    pub asr: ModelRef,
    /// `None` means no speaker labelling was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diarizer: Option<ModelRef>,
}

impl ModelSelection {
    pub fn transcription_only(asr: ModelRef) -> Self {
        Self {
            asr,
            diarizer: None,
        }
    }

    pub fn with_diarizer(asr: ModelRef, diarizer: ModelRef) -> Self {
        Self {
            asr,
            diarizer: Some(diarizer),
        }
    }
}

/// Distinguishes why a job ended up `failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The transcription or diarization backend rejected or failed the input.
    ProviderError,
    /// The job was mid-run when the host process went away.
    StaleAfterRestart,
    /// Engine-side failure (store write lost, worker panic).
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ProviderError => "provider_error",
            ErrorCode::StaleAfterRestart => "stale_after_restart",
            ErrorCode::InternalError => "internal_error",
        }
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provider_error" => Ok(ErrorCode::ProviderError),
            "stale_after_restart" => Ok(ErrorCode::StaleAfterRestart),
            "internal_error" => Ok(ErrorCode::InternalError),
            other => Err(format!("unknown error code '{}'", other)),
        }
    }
}

/// Results recorded by the finalize stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_count: Option<u32>,
}

/// Signal flags written by the command router and read at checkpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalFlags {
    pub cancellation_requested: bool,
    pub pause_requested: bool,
    pub pause_requested_at: Option<DateTime<Utc>>,
}

/// The durable record of one transcription job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    /// Submitting user; only the API layer interprets it.
    pub owner: String,
    /// Reference to the uploaded media, resolved to a path during `uploading`.
    pub source_ref: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub progress_percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_left: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_total_seconds: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the job last entered the admission queue; FIFO order key.
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stalled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_requested_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    /// Active compute time accumulated across pause/resume cycles.
    pub processing_seconds: f64,
    pub resume_count: u32,
    pub models: ModelSelection,
    pub cancellation_requested: bool,
    pub pause_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default)]
    pub output: JobOutput,
    /// Set when this job was created by restarting another one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restarted_from: Option<JobId>,
}

impl Job {
    /// Creates a fresh `queued` job.
    pub fn new(owner: impl Into<String>, source_ref: impl Into<String>, models: ModelSelection) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.into(),
            source_ref: source_ref.into(),
            status: JobStatus::Queued,
            stage: None,
            progress_percent: 0,
            estimated_time_left: None,
            estimated_total_seconds: None,
            created_at: now,
            updated_at: now,
            enqueued_at: now,
            started_at: None,
            completed_at: None,
            stalled_at: None,
            pause_requested_at: None,
            paused_at: None,
            processing_seconds: 0.0,
            resume_count: 0,
            models,
            cancellation_requested: false,
            pause_requested: false,
            error: None,
            error_code: None,
            output: JobOutput::default(),
            restarted_from: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn wants_diarization(&self) -> bool {
        self.models.diarizer.is_some()
    }

    pub fn flags(&self) -> SignalFlags {
        SignalFlags {
            cancellation_requested: self.cancellation_requested,
            pause_requested: self.pause_requested,
            pause_requested_at: self.pause_requested_at,
        }
    }

    /// Clears live progress fields; used on resume and restart.
    pub(crate) fn reset_progress(&mut self) {
        self.stage = None;
        self.progress_percent = 0;
        self.estimated_time_left = None;
        self.estimated_total_seconds = None;
        self.stalled_at = None;
    }
}

/// Builds the replacement job for a "restart": a new row that shares the
/// source and model selection of `old` and starts its lifecycle from scratch.
/// `old` is never touched.
pub fn restart(old: &Job) -> Job {
    let mut job = Job::new(old.owner.clone(), old.source_ref.clone(), old.models.clone());
    job.restarted_from = Some(old.id.clone());
    job
}
