pub mod broadcast;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod progress;
pub mod provider;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, EngineConfig, LoggingConfig, ModelEntry, ModelsConfig};
pub use engine::{CommandRouter, Engine, EngineBuilder, ReconcileReport};
pub use error::{AdmissionError, CommandError, ConfigError, EngineError, Result};
pub use progress::{ProgressTracker, ProgressUpdate};
pub use provider::{
    Diarizer, ProgressSink, ProviderError, SourceResolver, SpeakerSegment, TranscriptResult,
    TranscriptSegment, TranscriptSink, Transcriber,
};
pub use store::{JobPage, JobQuery, JobRecordStore, SqliteJobStore, StoreError};
pub use telemetry::init_tracing;
pub use worker::{
    restart, AdmissionStats, ErrorCode, Job, JobEvent, JobId, JobOutput, JobStatus, ModelRef,
    ModelSelection, Stage, TransitionError,
};
