//! Command router: the engine's synchronous API surface.
//!
//! Every command returns as soon as its signal is recorded. Jobs on a worker
//! get the signal through their [`ActiveRun`](crate::worker::ActiveRun) and
//! act on it at the next stage boundary. Queued and paused jobs hold no
//! worker, so their transitions are written here under the admission lock.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{AdmissionError, CommandError};
use crate::store::{JobPage, JobQuery};
use crate::worker::admission::AdmissionController;
use crate::worker::job::{restart, Job, JobId, JobStatus, ModelSelection};
use crate::worker::run::{commit_transition, RunContext};
use crate::worker::state::JobEvent;

#[derive(Clone)]
pub struct CommandRouter {
    admission: Arc<AdmissionController>,
}

impl CommandRouter {
    pub fn new(admission: Arc<AdmissionController>) -> Self {
        Self { admission }
    }

    fn ctx(&self) -> &RunContext {
        self.admission.context()
    }

    fn load(&self, id: &str) -> Result<Job, CommandError> {
        self.ctx()
            .store
            .get(id)?
            .ok_or_else(|| CommandError::NotFound(id.to_string()))
    }

    pub fn submit(
        &self,
        owner: &str,
        source_ref: &str,
        models: ModelSelection,
    ) -> Result<JobId, AdmissionError> {
        self.admission.submit(owner, source_ref, models).map(|job| job.id)
    }

    /// Idempotent: cancelling a cancelling or cancelled job succeeds.
    pub fn cancel(&self, id: &str) -> Result<(), CommandError> {
        let mut state = self.admission.lock();
        if let Some(run) = state.active_run(id) {
            return run.request_cancel();
        }

        let current = self.load(id)?;
        match current.status {
            JobStatus::Cancelling | JobStatus::Cancelled => Ok(()),
            JobStatus::Queued | JobStatus::Paused => {
                commit_transition(self.ctx(), &current, JobEvent::CancelRequested, |job| {
                    job.cancellation_requested = true;
                    job.estimated_time_left = None;
                })
                .map_err(|e| e.into_command_error(id, "cancel"))?;
                state.remove_queued(id);
                Ok(())
            }
            status => Err(CommandError::InvalidState {
                job_id: id.to_string(),
                status,
                command: "cancel",
            }),
        }
    }

    /// Only a `processing` job can be paused; repeating the request while it
    /// is `pausing` or `paused` is accepted.
    pub fn pause(&self, id: &str) -> Result<(), CommandError> {
        let state = self.admission.lock();
        if let Some(run) = state.active_run(id) {
            return run.request_pause();
        }

        let current = self.load(id)?;
        match current.status {
            JobStatus::Pausing | JobStatus::Paused => Ok(()),
            status => Err(CommandError::InvalidState {
                job_id: id.to_string(),
                status,
                command: "pause",
            }),
        }
    }

    /// `paused -> queued`. The job goes to the back of the queue and its
    /// stages start over when it is dispatched again.
    pub fn resume(&self, id: &str) -> Result<(), CommandError> {
        let mut state = self.admission.lock();
        if let Some(run) = state.active_run(id) {
            return Err(CommandError::InvalidState {
                job_id: id.to_string(),
                status: run.status(),
                command: "resume",
            });
        }

        let current = self.load(id)?;
        if current.status != JobStatus::Paused {
            return Err(CommandError::InvalidState {
                job_id: id.to_string(),
                status: current.status,
                command: "resume",
            });
        }
        if state.is_shutdown() {
            return Err(AdmissionError::ShuttingDown.into());
        }

        let now = Utc::now();
        let next = commit_transition(self.ctx(), &current, JobEvent::ResumeRequested, |job| {
            job.resume_count += 1;
            job.cancellation_requested = false;
            job.pause_requested = false;
            job.pause_requested_at = None;
            job.enqueued_at = now;
            job.reset_progress();
        })
        .map_err(|e| e.into_command_error(id, "resume"))?;

        log::info!("Job {} resumed (resume #{})", id, next.resume_count);
        state.push_back(next);
        drop(state);
        self.admission.notify();
        Ok(())
    }

    /// Creates a fresh job from a terminal one. The old row is untouched.
    pub fn restart(&self, id: &str) -> Result<JobId, CommandError> {
        let old = self.load(id)?;
        if !old.is_terminal() {
            return Err(CommandError::InvalidState {
                job_id: id.to_string(),
                status: old.status,
                command: "restart",
            });
        }
        let job = self.admission.admit(restart(&old))?;
        log::info!("Job {} restarted as {}", id, job.id);
        Ok(job.id)
    }

    /// Read-through to the job record store.
    pub fn status(&self, id: &str) -> Result<Job, CommandError> {
        self.load(id)
    }

    pub fn list(&self, query: &JobQuery) -> Result<JobPage, CommandError> {
        Ok(self.ctx().store.list(query)?)
    }

    pub fn queue_position(&self, id: &str) -> Option<usize> {
        self.admission.queue_position(id)
    }
}
