//! Job state machine.
//!
//! Pure transition logic, no I/O. Every status write in the engine goes
//! through [`transition`], so a status history can only ever contain the
//! edges listed in [`EDGES`].

use std::fmt;

use thiserror::Error;

use super::job::JobStatus;

/// Inputs that may move a job between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// A worker slot picked the job up.
    Dispatched,
    CancelRequested,
    PauseRequested,
    /// The last stage finished and results were recorded.
    StagesCompleted,
    ProviderFailed,
    /// The controller reached a stage boundary with a pending signal.
    CheckpointReached,
    ResumeRequested,
    /// Found mid-run after a process restart with no live worker.
    Abandoned,
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobEvent::Dispatched => "dispatched",
            JobEvent::CancelRequested => "cancel requested",
            JobEvent::PauseRequested => "pause requested",
            JobEvent::StagesCompleted => "stages completed",
            JobEvent::ProviderFailed => "provider failed",
            JobEvent::CheckpointReached => "checkpoint reached",
            JobEvent::ResumeRequested => "resume requested",
            JobEvent::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Illegal transition: '{event}' is not allowed from status '{from}'")]
pub struct TransitionError {
    pub from: JobStatus,
    pub event: JobEvent,
}

/// The complete edge table: `(from, event, to)`.
pub const EDGES: &[(JobStatus, JobEvent, JobStatus)] = &[
    (JobStatus::Queued, JobEvent::Dispatched, JobStatus::Processing),
    (JobStatus::Queued, JobEvent::CancelRequested, JobStatus::Cancelled),
    (JobStatus::Processing, JobEvent::PauseRequested, JobStatus::Pausing),
    (JobStatus::Processing, JobEvent::CancelRequested, JobStatus::Cancelling),
    (JobStatus::Processing, JobEvent::StagesCompleted, JobStatus::Completed),
    (JobStatus::Processing, JobEvent::ProviderFailed, JobStatus::Failed),
    (JobStatus::Processing, JobEvent::Abandoned, JobStatus::Failed),
    (JobStatus::Pausing, JobEvent::CheckpointReached, JobStatus::Paused),
    (JobStatus::Pausing, JobEvent::CancelRequested, JobStatus::Cancelling),
    (JobStatus::Pausing, JobEvent::ProviderFailed, JobStatus::Failed),
    (JobStatus::Pausing, JobEvent::Abandoned, JobStatus::Failed),
    (JobStatus::Cancelling, JobEvent::CheckpointReached, JobStatus::Cancelled),
    (JobStatus::Cancelling, JobEvent::Abandoned, JobStatus::Failed),
    (JobStatus::Paused, JobEvent::ResumeRequested, JobStatus::Queued),
    (JobStatus::Paused, JobEvent::CancelRequested, JobStatus::Cancelled),
];

/// Returns the status reached by applying `event` in status `from`.
pub fn transition(from: JobStatus, event: JobEvent) -> Result<JobStatus, TransitionError> {
    EDGES
        .iter()
        .find(|(f, e, _)| *f == from && *e == event)
        .map(|(_, _, to)| *to)
        .ok_or(TransitionError { from, event })
}

/// True if `from -> to` is an edge for some event.
pub fn is_legal(from: JobStatus, to: JobStatus) -> bool {
    EDGES.iter().any(|(f, _, t)| *f == from && *t == to)
}
