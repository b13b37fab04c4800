//! Startup reconciliation of rows left behind by a previous process.

use crate::store::StoreError;
use crate::worker::admission::AdmissionController;
use crate::worker::job::{ErrorCode, JobStatus};
use crate::worker::run::{commit_transition, RunError};
use crate::worker::state::JobEvent;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Mid-run rows forced to `failed`.
    pub failed: usize,
    /// `queued` rows put back on the admission queue.
    pub requeued: usize,
    /// `paused` rows left waiting for a resume.
    pub paused: usize,
}

/// Fails every row that was mid-run (no worker survives a restart), then
/// re-enqueues `queued` rows oldest first. Must run before workers start.
pub fn reconcile(admission: &AdmissionController) -> Result<ReconcileReport, StoreError> {
    let ctx = admission.context();
    let mut report = ReconcileReport::default();

    let orphaned = ctx.store.find_by_status(&[
        JobStatus::Processing,
        JobStatus::Pausing,
        JobStatus::Cancelling,
    ])?;
    for job in orphaned {
        let was = job.status;
        let result = commit_transition(ctx, &job, JobEvent::Abandoned, |job| {
            job.error = Some(format!(
                "stale after restart: job was {} when the engine stopped",
                was
            ));
            job.error_code = Some(ErrorCode::StaleAfterRestart);
            job.completed_at = None;
            job.estimated_time_left = None;
        });
        match result {
            Ok(_) => {
                log::warn!("Job {} was {} at startup; marked failed", job.id, was);
                report.failed += 1;
            }
            Err(RunError::Store(e)) => return Err(e),
            Err(RunError::Transition(e)) => log::error!("Cannot reconcile job {}: {}", job.id, e),
        }
    }

    for job in ctx.store.find_by_status(&[JobStatus::Queued])? {
        admission.enqueue_existing(job);
        report.requeued += 1;
    }

    report.paused = ctx.store.find_by_status(&[JobStatus::Paused])?.len();

    if report != ReconcileReport::default() {
        log::info!(
            "Reconciled store: {} failed, {} requeued, {} paused",
            report.failed,
            report.requeued,
            report.paused
        );
    }
    Ok(report)
}
