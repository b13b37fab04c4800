//! Job record store: the durable source of truth for job status.
//!
//! The engine only needs read/write-by-id plus a status-guarded update, so
//! that is all the trait asks for. [`SqliteJobStore`] is the bundled
//! implementation.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::worker::job::{Job, JobId, JobStatus, SignalFlags};

pub mod sqlite;

pub use sqlite::SqliteJobStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// The guarded update lost: someone else moved the job first.
    #[error("Optimistic update conflict on job {id}: expected status '{expected}', found '{actual}'")]
    Conflict {
        id: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("Corrupt job row {id}: {reason}")]
    Corrupt { id: JobId, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Listing filter exposed to the API layer.
#[derive(Debug, Default, Clone)]
pub struct JobQuery {
    pub owner: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// One page of a job listing.
#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: u64,
}

pub trait JobRecordStore: Send + Sync {
    fn insert(&self, job: &Job) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Writes `job`'s lifecycle fields only if the stored status is still
    /// `expected`. Fails with [`StoreError::Conflict`] otherwise.
    fn update_if(&self, job: &Job, expected: JobStatus) -> Result<(), StoreError>;

    /// Writes the signal flag columns and nothing else.
    fn set_flags(&self, id: &str, flags: &SignalFlags) -> Result<(), StoreError>;

    /// Jobs in any of `statuses`, oldest queue entry first.
    fn find_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, StoreError>;

    fn list(&self, query: &JobQuery) -> Result<JobPage, StoreError>;
}
