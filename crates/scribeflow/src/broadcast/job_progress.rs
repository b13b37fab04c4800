//! Job progress broadcaster for real-time job status streaming.
//!
//! Polling `get_job_status` remains the primary contract; this is the push
//! channel for SSE/WebSocket consumers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::worker::job::{ErrorCode, Job, JobStatus, Stage};

/// Progress or transition event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub owner: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub progress_percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_left: Option<u64>,
    /// Human-readable description of what changed.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    /// Snapshot of `job` as persisted.
    pub fn from_job(job: &Job, message: impl Into<String>) -> Self {
        Self {
            job_id: job.id.clone(),
            owner: job.owner.clone(),
            status: job.status,
            stage: job.stage,
            progress_percent: job.progress_percent,
            estimated_time_left: job.estimated_time_left,
            message: message.into(),
            error: job.error.clone(),
            error_code: job.error_code,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn publish(&self, job: &Job, message: impl Into<String>) {
        self.send(JobProgressEvent::from_job(job, message));
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
