//! Job repository: row-level operations on the `jobs` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub owner: String,
    pub source_ref: String,
    pub status: String,
    pub stage: Option<String>,
    pub progress_percent: i64,
    pub estimated_time_left: Option<i64>,
    pub estimated_total_seconds: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    pub enqueued_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub stalled_at: Option<String>,
    pub pause_requested_at: Option<String>,
    pub paused_at: Option<String>,
    pub processing_seconds: f64,
    pub resume_count: i64,
    pub asr_provider: String,
    pub asr_model: String,
    pub diarizer_provider: Option<String>,
    pub diarizer_model: Option<String>,
    pub cancellation_requested: bool,
    pub pause_requested: bool,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub transcript_path: Option<String>,
    pub language: Option<String>,
    pub duration_seconds: Option<f64>,
    pub speaker_count: Option<i64>,
    pub restarted_from: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner: row.get("owner")?,
            source_ref: row.get("source_ref")?,
            status: row.get("status")?,
            stage: row.get("stage")?,
            progress_percent: row.get("progress_percent")?,
            estimated_time_left: row.get("estimated_time_left")?,
            estimated_total_seconds: row.get("estimated_total_seconds")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            enqueued_at: row.get("enqueued_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            stalled_at: row.get("stalled_at")?,
            pause_requested_at: row.get("pause_requested_at")?,
            paused_at: row.get("paused_at")?,
            processing_seconds: row.get("processing_seconds")?,
            resume_count: row.get("resume_count")?,
            asr_provider: row.get("asr_provider")?,
            asr_model: row.get("asr_model")?,
            diarizer_provider: row.get("diarizer_provider")?,
            diarizer_model: row.get("diarizer_model")?,
            cancellation_requested: row.get("cancellation_requested")?,
            pause_requested: row.get("pause_requested")?,
            error: row.get("error")?,
            error_code: row.get("error_code")?,
            transcript_path: row.get("transcript_path")?,
            language: row.get("language")?,
            duration_seconds: row.get("duration_seconds")?,
            speaker_count: row.get("speaker_count")?,
            restarted_from: row.get("restarted_from")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub owner: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, owner, source_ref, status, stage, progress_percent,
             estimated_time_left, estimated_total_seconds, created_at, updated_at, enqueued_at,
             started_at, completed_at, stalled_at, pause_requested_at, paused_at,
             processing_seconds, resume_count, asr_provider, asr_model, diarizer_provider,
             diarizer_model, cancellation_requested, pause_requested, error, error_code,
             transcript_path, language, duration_seconds, speaker_count, restarted_from)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31)",
            params![
                job.id,
                job.owner,
                job.source_ref,
                job.status,
                job.stage,
                job.progress_percent,
                job.estimated_time_left,
                job.estimated_total_seconds,
                job.created_at,
                job.updated_at,
                job.enqueued_at,
                job.started_at,
                job.completed_at,
                job.stalled_at,
                job.pause_requested_at,
                job.paused_at,
                job.processing_seconds,
                job.resume_count,
                job.asr_provider,
                job.asr_model,
                job.diarizer_provider,
                job.diarizer_model,
                job.cancellation_requested,
                job.pause_requested,
                job.error,
                job.error_code,
                job.transcript_path,
                job.language,
                job.duration_seconds,
                job.speaker_count,
                job.restarted_from,
            ],
        )?;
        Ok(())
    })
}

/// Result of a status-guarded update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardedUpdate {
    Applied,
    /// The guard failed; carries the status actually stored.
    StatusMismatch(String),
    Missing,
}

/// Overwrites the mutable lifecycle columns of a job, but only if the stored
/// status still equals `expected_status`. The guard check and the read-back
/// on failure happen in one transaction.
///
/// Identity, ownership and model selection columns are never written here.
pub fn update_if_status(
    db: &Database,
    job: &JobRow,
    expected_status: &str,
) -> Result<GuardedUpdate, DatabaseError> {
    db.with_tx(|tx| {
        let changed = tx.execute(
            "UPDATE jobs SET status=?2, stage=?3, progress_percent=?4, estimated_time_left=?5,
             estimated_total_seconds=?6, updated_at=?7, enqueued_at=?8, started_at=?9,
             completed_at=?10, stalled_at=?11, pause_requested_at=?12, paused_at=?13,
             processing_seconds=?14, resume_count=?15, cancellation_requested=?16,
             pause_requested=?17, error=?18, error_code=?19, transcript_path=?20, language=?21,
             duration_seconds=?22, speaker_count=?23
             WHERE id=?1 AND status=?24",
            params![
                job.id,
                job.status,
                job.stage,
                job.progress_percent,
                job.estimated_time_left,
                job.estimated_total_seconds,
                job.updated_at,
                job.enqueued_at,
                job.started_at,
                job.completed_at,
                job.stalled_at,
                job.pause_requested_at,
                job.paused_at,
                job.processing_seconds,
                job.resume_count,
                job.cancellation_requested,
                job.pause_requested,
                job.error,
                job.error_code,
                job.transcript_path,
                job.language,
                job.duration_seconds,
                job.speaker_count,
                expected_status,
            ],
        )?;
        if changed == 1 {
            return Ok(GuardedUpdate::Applied);
        }
        Ok(match status_of(tx, &job.id)? {
            Some(actual) => GuardedUpdate::StatusMismatch(actual),
            None => GuardedUpdate::Missing,
        })
    })
}

/// Writes only the signal flag columns. Returns the number of rows changed.
pub fn set_flags(
    db: &Database,
    id: &str,
    cancellation_requested: bool,
    pause_requested: bool,
    pause_requested_at: Option<&str>,
    updated_at: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET cancellation_requested=?2, pause_requested=?3,
             pause_requested_at=?4, updated_at=?5 WHERE id=?1",
            params![
                id,
                cancellation_requested,
                pause_requested,
                pause_requested_at,
                updated_at
            ],
        )?;
        Ok(changed)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

fn status_of(conn: &Connection, id: &str) -> Result<Option<String>, DatabaseError> {
    Ok(conn
        .query_row("SELECT status FROM jobs WHERE id = ?1", params![id], |r| r.get(0))
        .optional()?)
}

/// Returns the current status of a job, if it exists.
pub fn find_status(db: &Database, id: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| status_of(conn, id))
}

/// Returns every job whose status is one of `statuses`, oldest queue entry first.
pub fn find_by_statuses(db: &Database, statuses: &[&str]) -> Result<Vec<JobRow>, DatabaseError> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    db.with_conn(|conn| {
        let placeholders: Vec<String> = (1..=statuses.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT * FROM jobs WHERE status IN ({}) ORDER BY enqueued_at ASC, created_at ASC",
            placeholders.join(", ")
        );
        let params_ref: Vec<&dyn rusqlite::types::ToSql> = statuses
            .iter()
            .map(|s| s as &dyn rusqlite::types::ToSql)
            .collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Queries jobs with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref owner) = filter.owner {
            conditions.push(format!("owner = ?{}", param_values.len() + 1));
            param_values.push(Box::new(owner.clone()));
        }
        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
