//! The shared half of a dispatched job.
//!
//! An [`ActiveRun`] is created when a worker slot picks a job up and dropped
//! when the slot is released. The worker drives it through the lifecycle; the
//! command router reaches it to deliver pause and cancel signals. All status
//! writes go through [`commit_transition`], which validates the edge and makes
//! a store update guarded by the last-known status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;

use crate::broadcast::JobProgressBroadcaster;
use crate::error::CommandError;
use crate::progress::ProgressTracker;
use crate::provider::ProgressSink;
use crate::store::{JobRecordStore, StoreError};
use crate::worker::job::{ErrorCode, Job, JobId, JobOutput, JobStatus, Stage};
use crate::worker::state::{self, JobEvent, TransitionError};

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RunError {
    pub(crate) fn into_command_error(self, job_id: &str, command: &'static str) -> CommandError {
        match self {
            RunError::Transition(e) => CommandError::InvalidState {
                job_id: job_id.to_string(),
                status: e.from,
                command,
            },
            RunError::Store(StoreError::Conflict { actual, .. }) => CommandError::InvalidState {
                job_id: job_id.to_string(),
                status: actual,
                command,
            },
            RunError::Store(e) => CommandError::Store(e),
        }
    }
}

/// Collaborators every run writes through.
pub struct RunContext {
    pub store: Arc<dyn JobRecordStore>,
    pub tracker: Arc<ProgressTracker>,
    pub broadcaster: JobProgressBroadcaster,
    /// Minimum spacing between percent-only writes.
    pub persist_interval: Duration,
}

/// Validates `event` against `current.status`, applies `mutate` to a copy,
/// and writes it only if the stored status still equals `current.status`.
pub fn commit_transition(
    ctx: &RunContext,
    current: &Job,
    event: JobEvent,
    mutate: impl FnOnce(&mut Job),
) -> Result<Job, RunError> {
    let from = current.status;
    let to = state::transition(from, event)?;

    let mut next = current.clone();
    next.status = to;
    next.updated_at = Utc::now();
    mutate(&mut next);

    ctx.store.update_if(&next, from)?;
    log::info!("Job {}: {} -> {} ({})", next.id, from, to, event);
    ctx.broadcaster.publish(&next, event.to_string());
    Ok(next)
}

/// Cooperative cancellation token. Set by the router, read at checkpoints.
#[derive(Debug, Default)]
pub struct RunSignals {
    cancel: AtomicBool,
    pause: AtomicBool,
}

impl RunSignals {
    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::Acquire)
    }

    fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    fn request_pause(&self) {
        self.pause.store(true, Ordering::Release);
    }
}

/// Signal observed at a stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Cancel,
    Pause,
}

/// How the lifecycle left a run. Turned into the final transition when the
/// slot is released.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(JobOutput),
    Paused,
    Cancelled,
    Failed { message: String, code: ErrorCode },
    /// The run never got going (lost dispatch write); nothing to record.
    Aborted,
}

struct RunState {
    job: Job,
    active_since: Option<Instant>,
    last_persist: Option<Instant>,
}

pub struct ActiveRun {
    id: JobId,
    state: Mutex<RunState>,
    signals: RunSignals,
    ctx: Arc<RunContext>,
}

impl ActiveRun {
    pub fn new(job: Job, ctx: Arc<RunContext>) -> Self {
        let signals = RunSignals::default();
        if job.cancellation_requested {
            signals.request_cancel();
        }
        Self {
            id: job.id.clone(),
            state: Mutex::new(RunState {
                job,
                active_since: None,
                last_persist: None,
            }),
            signals,
            ctx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> Job {
        self.lock().job.clone()
    }

    pub fn status(&self) -> JobStatus {
        self.lock().job.status
    }

    pub fn signals(&self) -> &RunSignals {
        &self.signals
    }

    /// Cancel wins over pause.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        if self.signals.cancel_requested() {
            Some(Checkpoint::Cancel)
        } else if self.signals.pause_requested() {
            Some(Checkpoint::Pause)
        } else {
            None
        }
    }

    fn apply(
        &self,
        state: &mut RunState,
        event: JobEvent,
        mutate: impl FnOnce(&mut Job),
    ) -> Result<JobStatus, RunError> {
        let next = commit_transition(&self.ctx, &state.job, event, mutate)?;
        state.job = next;
        state.last_persist = Some(Instant::now());
        Ok(state.job.status)
    }

    /// `queued -> processing`. Returns `Ok(false)` if a cancel arrived before
    /// the job started; the caller then finishes the run as cancelled.
    pub fn dispatch(&self) -> Result<bool, RunError> {
        let mut state = self.lock();
        if self.signals.cancel_requested() {
            return Ok(false);
        }
        let now = Utc::now();
        self.apply(&mut state, JobEvent::Dispatched, |job| {
            job.started_at.get_or_insert(now);
            job.reset_progress();
        })?;
        state.active_since = Some(Instant::now());
        Ok(true)
    }

    /// Starts a stage at 0% and persists it immediately.
    pub fn begin_stage(&self, stage: Stage) {
        self.report_progress(stage, 0.0, None);
    }

    pub fn report_progress(&self, stage: Stage, percent: f32, eta_seconds: Option<f64>) {
        let mut state = self.lock();
        // Late callbacks after `finish` must not re-register the job.
        if !state.job.status.holds_worker() {
            return;
        }
        let update = self.ctx.tracker.report(&self.id, stage, percent, eta_seconds);
        state.job.stage = Some(update.stage);
        state.job.progress_percent = update.percent;
        state.job.estimated_time_left = update.eta_seconds;
        state.job.estimated_total_seconds = update.total_seconds;
        if update.stall_cleared {
            state.job.stalled_at = None;
        }

        let now = Instant::now();
        let due = update.stage_changed
            || update.stall_cleared
            || state
                .last_persist
                .map_or(true, |t| now.saturating_duration_since(t) >= self.ctx.persist_interval);
        if !due {
            return;
        }

        let message = if update.stall_cleared {
            format!("{} resumed reporting", update.stage)
        } else if update.stage_changed {
            format!("{} started", update.stage)
        } else {
            format!("{} {}%", update.stage, update.percent)
        };
        self.persist(&mut state, now, &message);
    }

    /// Annotates the job as stalled without touching its status.
    pub fn mark_stalled(&self) {
        let mut state = self.lock();
        if state.job.status != JobStatus::Processing {
            return;
        }
        // A report between detection and here has already cleared the stall.
        if !self.ctx.tracker.is_stalled(&self.id) {
            return;
        }
        log::warn!(
            "Job {} stalled: no progress for {:?}",
            self.id,
            self.ctx.tracker.stall_timeout()
        );
        state.job.stage = Some(Stage::Stalled);
        state.job.stalled_at = Some(Utc::now());
        self.persist(&mut state, Instant::now(), "stalled");
    }

    fn persist(&self, state: &mut RunState, now: Instant, message: &str) {
        let expected = state.job.status;
        state.job.updated_at = Utc::now();
        match self.ctx.store.update_if(&state.job, expected) {
            Ok(()) => {
                state.last_persist = Some(now);
                self.ctx.broadcaster.publish(&state.job, message);
            }
            Err(e) => log::error!("Failed to persist progress for job {}: {}", self.id, e),
        }
    }

    /// Router side of cancel. Idempotent.
    pub fn request_cancel(&self) -> Result<(), CommandError> {
        let mut state = self.lock();
        match state.job.status {
            JobStatus::Cancelling | JobStatus::Cancelled => Ok(()),
            JobStatus::Processing | JobStatus::Pausing => {
                self.apply(&mut state, JobEvent::CancelRequested, |job| {
                    job.cancellation_requested = true;
                })
                .map(|_| self.signals.request_cancel())
                .map_err(|e| e.into_command_error(&self.id, "cancel"))
            }
            JobStatus::Queued => {
                // Registered but not yet dispatched; dispatch sees the signal.
                state.job.cancellation_requested = true;
                let flags = state.job.flags();
                self.ctx.store.set_flags(&self.id, &flags)?;
                self.signals.request_cancel();
                Ok(())
            }
            status => Err(CommandError::InvalidState {
                job_id: self.id.clone(),
                status,
                command: "cancel",
            }),
        }
    }

    /// Router side of pause. Idempotent while pausing.
    pub fn request_pause(&self) -> Result<(), CommandError> {
        let mut state = self.lock();
        match state.job.status {
            JobStatus::Pausing => Ok(()),
            JobStatus::Processing => {
                let now = Utc::now();
                self.apply(&mut state, JobEvent::PauseRequested, |job| {
                    job.pause_requested = true;
                    job.pause_requested_at = Some(now);
                })
                .map(|_| self.signals.request_pause())
                .map_err(|e| e.into_command_error(&self.id, "pause"))
            }
            status => Err(CommandError::InvalidState {
                job_id: self.id.clone(),
                status,
                command: "pause",
            }),
        }
    }

    /// Applies the final transition for `outcome`. The release itself is a
    /// checkpoint: a signal that landed after the lifecycle's last check
    /// still decides the final status.
    pub fn finish(&self, outcome: RunOutcome) -> Result<JobStatus, RunError> {
        let mut state = self.lock();
        self.ctx.tracker.remove(&self.id);

        let worked = state
            .active_since
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let now = Utc::now();
        let status = state.job.status;

        match (outcome, status) {
            (RunOutcome::Aborted, status) => return Ok(status),
            (RunOutcome::Cancelled, JobStatus::Queued) => {
                self.apply(&mut state, JobEvent::CancelRequested, |job| {
                    job.cancellation_requested = true;
                })
            }
            (_, JobStatus::Cancelling) => {
                self.apply(&mut state, JobEvent::CheckpointReached, |job| {
                    job.processing_seconds += worked;
                    job.estimated_time_left = None;
                })
            }
            (RunOutcome::Completed(output), JobStatus::Processing) => {
                self.apply(&mut state, JobEvent::StagesCompleted, |job| {
                    job.processing_seconds += worked;
                    job.completed_at = Some(now);
                    job.stage = Some(Stage::Finalizing);
                    job.progress_percent = 100;
                    job.estimated_time_left = Some(0);
                    job.output = output;
                })
            }
            (RunOutcome::Completed(_) | RunOutcome::Paused, JobStatus::Pausing) => {
                self.apply(&mut state, JobEvent::CheckpointReached, |job| {
                    job.processing_seconds += worked;
                    job.paused_at = Some(now);
                    job.estimated_time_left = None;
                })
            }
            (RunOutcome::Failed { message, code }, JobStatus::Processing | JobStatus::Pausing) => {
                log::error!("Job {} failed: {}", self.id, message);
                self.apply(&mut state, JobEvent::ProviderFailed, |job| {
                    job.processing_seconds += worked;
                    job.error = Some(message);
                    job.error_code = Some(code);
                    job.completed_at = None;
                    job.estimated_time_left = None;
                })
            }
            (outcome, status) => {
                log::error!(
                    "Job {} ended with {:?} while {}; recording as failed",
                    self.id,
                    outcome,
                    status
                );
                self.apply(&mut state, JobEvent::ProviderFailed, |job| {
                    job.processing_seconds += worked;
                    job.error = Some(format!("run ended unexpectedly while {}", status));
                    job.error_code = Some(ErrorCode::InternalError);
                })
            }
        }
    }
}

/// [`ProgressSink`] bound to one stage of one run.
pub struct StageSink<'a> {
    run: &'a ActiveRun,
    stage: Stage,
}

impl<'a> StageSink<'a> {
    pub fn new(run: &'a ActiveRun, stage: Stage) -> Self {
        Self { run, stage }
    }
}

impl ProgressSink for StageSink<'_> {
    fn report(&self, percent: f32, eta_seconds: Option<f64>) {
        self.run.report_progress(self.stage, percent, eta_seconds);
    }
}
