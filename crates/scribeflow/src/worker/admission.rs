//! Bounded-concurrency admission.
//!
//! Submissions are validated, recorded as `queued`, and held in a FIFO queue.
//! Workers block in [`AdmissionController::next`] until a slot is free and a
//! job is waiting. Capacity never rejects a submission; it only delays it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::error::AdmissionError;
use crate::provider::ModelCatalog;
use crate::worker::job::{Job, JobId, ModelSelection};
use crate::worker::run::{ActiveRun, RunContext, RunOutcome};

/// Point-in-time occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionStats {
    pub active: usize,
    pub queued: usize,
    pub capacity: usize,
}

/// Queue and slot table. Only reachable through the controller's lock.
pub struct AdmissionState {
    queue: VecDeque<Job>,
    active: HashMap<JobId, Arc<ActiveRun>>,
    shutdown: bool,
}

impl AdmissionState {
    pub fn active_run(&self, id: &str) -> Option<Arc<ActiveRun>> {
        self.active.get(id).cloned()
    }

    pub fn is_queued(&self, id: &str) -> bool {
        self.queue.iter().any(|job| job.id == id)
    }

    /// 0-based position in the wait queue.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.queue.iter().position(|job| job.id == id)
    }

    pub fn remove_queued(&mut self, id: &str) -> Option<Job> {
        let index = self.position(id)?;
        self.queue.remove(index)
    }

    pub fn push_back(&mut self, job: Job) {
        self.queue.push_back(job);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }
}

pub struct AdmissionController {
    state: Mutex<AdmissionState>,
    available: Condvar,
    capacity: usize,
    catalog: Arc<dyn ModelCatalog>,
    diarization_available: bool,
    ctx: Arc<RunContext>,
}

impl AdmissionController {
    pub fn new(capacity: usize, catalog: Arc<dyn ModelCatalog>, ctx: Arc<RunContext>) -> Self {
        Self {
            state: Mutex::new(AdmissionState {
                queue: VecDeque::new(),
                active: HashMap::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
            catalog,
            diarization_available: true,
            ctx,
        }
    }

    /// Rejects diarized submissions when no diarization provider is wired in.
    pub fn without_diarizer(mut self) -> Self {
        self.diarization_available = false;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wakes one idle worker after a queue change made under [`lock`](Self::lock).
    pub(crate) fn notify(&self) {
        self.available.notify_one();
    }

    /// Structural checks only. The job row is never created if these fail.
    pub fn validate(&self, source_ref: &str, models: &ModelSelection) -> Result<(), AdmissionError> {
        if !self.catalog.has_enabled_transcriber() {
            return Err(AdmissionError::NoEnabledModel);
        }
        if !self.catalog.transcriber_enabled(&models.asr) {
            return Err(AdmissionError::ModelDisabled {
                model: models.asr.clone(),
            });
        }
        if let Some(diarizer) = &models.diarizer {
            if !self.catalog.diarizer_enabled(diarizer) {
                return Err(AdmissionError::DiarizerDisabled {
                    model: diarizer.clone(),
                });
            }
            if !self.diarization_available {
                return Err(AdmissionError::NoDiarizerProvider {
                    model: diarizer.clone(),
                });
            }
        }

        // Refs without a recognisable extension are left to the resolver.
        if let Some(mime) = mime_guess::from_path(source_ref).first() {
            let kind = mime.type_();
            if kind != mime_guess::mime::AUDIO && kind != mime_guess::mime::VIDEO {
                return Err(AdmissionError::UnsupportedMedia {
                    source_ref: source_ref.to_string(),
                    mime: mime.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn submit(
        &self,
        owner: &str,
        source_ref: &str,
        models: ModelSelection,
    ) -> Result<Job, AdmissionError> {
        self.admit(Job::new(owner, source_ref, models))
    }

    /// Validates, records and enqueues an already-built `queued` job.
    pub fn admit(&self, job: Job) -> Result<Job, AdmissionError> {
        if let Err(e) = self.validate(&job.source_ref, &job.models) {
            log::warn!("Rejected job for {} ({}): {}", job.owner, job.source_ref, e);
            return Err(e);
        }

        let mut state = self.lock();
        if state.shutdown {
            return Err(AdmissionError::ShuttingDown);
        }
        self.ctx.store.insert(&job)?;
        state.queue.push_back(job.clone());
        let position = state.queue.len() - 1;
        drop(state);

        log::info!(
            "Job {} queued for {} ({} ahead)",
            job.id,
            job.models.asr,
            position
        );
        self.ctx.broadcaster.publish(&job, "queued");
        self.notify();
        Ok(job)
    }

    /// Re-enqueues a job that is already recorded as `queued`.
    pub fn enqueue_existing(&self, job: Job) {
        let mut state = self.lock();
        state.queue.push_back(job);
        drop(state);
        self.notify();
    }

    /// Blocks until a slot and a job are both available, then registers the
    /// run. Returns `None` once shut down.
    pub fn next(&self) -> Option<Arc<ActiveRun>> {
        let mut state = self.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if state.active.len() < self.capacity {
                if let Some(job) = state.queue.pop_front() {
                    let run = Arc::new(ActiveRun::new(job, Arc::clone(&self.ctx)));
                    state.active.insert(run.id().to_string(), Arc::clone(&run));
                    return Some(run);
                }
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Records the run's final transition and frees its slot in one step, so
    /// a job is never `paused` or terminal while still holding a slot.
    pub fn release(&self, run: &Arc<ActiveRun>, outcome: RunOutcome) {
        let mut state = self.lock();
        match run.finish(outcome) {
            Ok(status) => log::debug!("Released slot for job {} ({})", run.id(), status),
            Err(e) => log::error!("Final transition for job {} failed: {}", run.id(), e),
        }
        if let Some(current) = state.active.get(run.id()) {
            if Arc::ptr_eq(current, run) {
                state.active.remove(run.id());
            }
        }
        drop(state);
        self.available.notify_all();
    }

    pub fn active_runs(&self) -> Vec<Arc<ActiveRun>> {
        self.lock().active.values().cloned().collect()
    }

    pub fn queue_position(&self, id: &str) -> Option<usize> {
        self.lock().position(id)
    }

    pub fn stats(&self) -> AdmissionStats {
        let state = self.lock();
        AdmissionStats {
            active: state.active.len(),
            queued: state.queue.len(),
            capacity: self.capacity,
        }
    }

    /// Stops handing out work. Queued jobs stay `queued` in the store.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shutdown = true;
        drop(state);
        self.available.notify_all();
    }
}
