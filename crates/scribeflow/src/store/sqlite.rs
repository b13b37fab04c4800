//! SQLite-backed job record store.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::job_repo::{self, GuardedUpdate, JobFilter, JobRow};
use crate::db::Database;
use crate::worker::job::{
    ErrorCode, Job, JobOutput, JobStatus, ModelRef, ModelSelection, SignalFlags, Stage,
};

use super::{JobPage, JobQuery, JobRecordStore, StoreError};

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Fixed-width so that stored timestamps sort lexically.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str, id: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("bad timestamp '{}': {}", s, e),
        })
}

fn parse_optional_timestamp(
    s: Option<&str>,
    id: &str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    s.map(|s| parse_timestamp(s, id)).transpose()
}

fn corrupt(id: &str) -> impl Fn(String) -> StoreError + '_ {
    move |reason| StoreError::Corrupt {
        id: id.to_string(),
        reason,
    }
}

fn seconds_to_column(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn column_to_seconds(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

fn job_to_row(job: &Job) -> JobRow {
    JobRow {
        id: job.id.clone(),
        owner: job.owner.clone(),
        source_ref: job.source_ref.clone(),
        status: job.status.as_str().to_string(),
        stage: job.stage.map(|s| s.as_str().to_string()),
        progress_percent: i64::from(job.progress_percent),
        estimated_time_left: job.estimated_time_left.map(seconds_to_column),
        estimated_total_seconds: job.estimated_total_seconds.map(seconds_to_column),
        created_at: format_timestamp(job.created_at),
        updated_at: format_timestamp(job.updated_at),
        enqueued_at: format_timestamp(job.enqueued_at),
        started_at: job.started_at.map(format_timestamp),
        completed_at: job.completed_at.map(format_timestamp),
        stalled_at: job.stalled_at.map(format_timestamp),
        pause_requested_at: job.pause_requested_at.map(format_timestamp),
        paused_at: job.paused_at.map(format_timestamp),
        processing_seconds: job.processing_seconds,
        resume_count: i64::from(job.resume_count),
        asr_provider: job.models.asr.provider.clone(),
        asr_model: job.models.asr.model.clone(),
        diarizer_provider: job.models.diarizer.as_ref().map(|d| d.provider.clone()),
        diarizer_model: job.models.diarizer.as_ref().map(|d| d.model.clone()),
        cancellation_requested: job.cancellation_requested,
        pause_requested: job.pause_requested,
        error: job.error.clone(),
        error_code: job.error_code.map(|c| c.as_str().to_string()),
        transcript_path: job
            .output
            .transcript_path
            .as_ref()
            .map(|p| p.display().to_string()),
        language: job.output.language.clone(),
        duration_seconds: job.output.duration_seconds,
        speaker_count: job.output.speaker_count.map(i64::from),
        restarted_from: job.restarted_from.clone(),
    }
}

fn row_to_job(row: JobRow) -> Result<Job, StoreError> {
    let id = row.id.clone();
    let status = row.status.parse::<JobStatus>().map_err(corrupt(&id))?;
    let stage = row
        .stage
        .as_deref()
        .map(str::parse::<Stage>)
        .transpose()
        .map_err(corrupt(&id))?;
    let error_code = row
        .error_code
        .as_deref()
        .map(str::parse::<ErrorCode>)
        .transpose()
        .map_err(corrupt(&id))?;
    let diarizer = match (row.diarizer_provider, row.diarizer_model) {
        (Some(provider), Some(model)) => Some(ModelRef { provider, model }),
        (None, None) => None,
        _ => {
            return Err(StoreError::Corrupt {
                id,
                reason: "diarizer provider and model must be set together".to_string(),
            })
        }
    };

    Ok(Job {
        status,
        stage,
        progress_percent: row.progress_percent.clamp(0, 100) as u8,
        estimated_time_left: row.estimated_time_left.map(column_to_seconds),
        estimated_total_seconds: row.estimated_total_seconds.map(column_to_seconds),
        created_at: parse_timestamp(&row.created_at, &id)?,
        updated_at: parse_timestamp(&row.updated_at, &id)?,
        enqueued_at: parse_timestamp(&row.enqueued_at, &id)?,
        started_at: parse_optional_timestamp(row.started_at.as_deref(), &id)?,
        completed_at: parse_optional_timestamp(row.completed_at.as_deref(), &id)?,
        stalled_at: parse_optional_timestamp(row.stalled_at.as_deref(), &id)?,
        pause_requested_at: parse_optional_timestamp(row.pause_requested_at.as_deref(), &id)?,
        paused_at: parse_optional_timestamp(row.paused_at.as_deref(), &id)?,
        processing_seconds: row.processing_seconds,
        resume_count: row.resume_count.max(0) as u32,
        models: ModelSelection {
            asr: ModelRef {
                provider: row.asr_provider,
                model: row.asr_model,
            },
            diarizer,
        },
        cancellation_requested: row.cancellation_requested,
        pause_requested: row.pause_requested,
        error: row.error,
        error_code,
        output: JobOutput {
            transcript_path: row.transcript_path.map(PathBuf::from),
            language: row.language,
            duration_seconds: row.duration_seconds,
            speaker_count: row.speaker_count.map(|v| v.max(0) as u32),
        },
        restarted_from: row.restarted_from,
        owner: row.owner,
        source_ref: row.source_ref,
        id,
    })
}

// ─── SqliteJobStore ─────────────────────────────────────────────────────────

/// Job record store backed by rusqlite.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store over a fresh in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn count_by_status(&self, status: JobStatus) -> Result<u64, StoreError> {
        Ok(job_repo::count_by_status(&self.db, status.as_str())?)
    }
}

impl JobRecordStore for SqliteJobStore {
    fn insert(&self, job: &Job) -> Result<(), StoreError> {
        job_repo::insert(&self.db, &job_to_row(job))?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        job_repo::find_by_id(&self.db, id)?
            .map(row_to_job)
            .transpose()
    }

    fn update_if(&self, job: &Job, expected: JobStatus) -> Result<(), StoreError> {
        match job_repo::update_if_status(&self.db, &job_to_row(job), expected.as_str())? {
            GuardedUpdate::Applied => Ok(()),
            GuardedUpdate::Missing => Err(StoreError::NotFound(job.id.clone())),
            GuardedUpdate::StatusMismatch(actual) => {
                let actual = actual.parse::<JobStatus>().map_err(corrupt(&job.id))?;
                log::error!(
                    "Guarded update lost for job {}: expected '{}', found '{}'",
                    job.id,
                    expected,
                    actual
                );
                Err(StoreError::Conflict {
                    id: job.id.clone(),
                    expected,
                    actual,
                })
            }
        }
    }

    fn set_flags(&self, id: &str, flags: &SignalFlags) -> Result<(), StoreError> {
        let changed = job_repo::set_flags(
            &self.db,
            id,
            flags.cancellation_requested,
            flags.pause_requested,
            flags.pause_requested_at.map(format_timestamp).as_deref(),
            &format_timestamp(Utc::now()),
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn find_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, StoreError> {
        let names: Vec<&str> = statuses.iter().map(JobStatus::as_str).collect();
        job_repo::find_by_statuses(&self.db, &names)?
            .into_iter()
            .map(row_to_job)
            .collect()
    }

    fn list(&self, query: &JobQuery) -> Result<JobPage, StoreError> {
        let filter = JobFilter {
            owner: query.owner.clone(),
            status: query.status.map(|s| s.as_str().to_string()),
            limit: query.limit,
            offset: query.offset,
        };
        let (rows, total) = job_repo::query(&self.db, &filter)?;
        let jobs = rows
            .into_iter()
            .map(row_to_job)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(JobPage { jobs, total })
    }
}
