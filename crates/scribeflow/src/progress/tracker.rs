use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::worker::job::{JobId, Stage};

/// Upper bound for any ETA; keeps the value representable in a SQLite integer.
pub const MAX_ETA_SECS: u64 = i64::MAX as u64;

/// Normalised view of one job's progress after a report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub stage: Stage,
    pub percent: u8,
    pub eta_seconds: Option<u64>,
    pub total_seconds: Option<u64>,
    /// The report started a new stage.
    pub stage_changed: bool,
    /// The report cleared a stall annotation.
    pub stall_cleared: bool,
}

#[derive(Debug)]
struct StageProgress {
    stage: Stage,
    percent: u8,
    stage_started: Instant,
    last_report: Instant,
    stalled: bool,
}

/// Converts provider callbacks into `(stage, percent, eta)` and detects
/// stalls. Percent is clamped to 0..=100 and never goes backwards within a
/// stage; a new stage starts again from its own reported value.
pub struct ProgressTracker {
    stall_timeout: Duration,
    entries: Mutex<HashMap<JobId, StageProgress>>,
}

impl ProgressTracker {
    pub fn new(stall_timeout: Duration) -> Self {
        Self {
            stall_timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn stall_timeout(&self) -> Duration {
        self.stall_timeout
    }

    pub fn report(&self, job_id: &str, stage: Stage, percent: f32, eta_seconds: Option<f64>) -> ProgressUpdate {
        self.report_at(job_id, stage, percent, eta_seconds, Instant::now())
    }

    pub fn report_at(
        &self,
        job_id: &str,
        stage: Stage,
        percent: f32,
        eta_seconds: Option<f64>,
        now: Instant,
    ) -> ProgressUpdate {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let clamped = clamp_percent(percent);
        let mut created = false;
        let entry = entries.entry(job_id.to_string()).or_insert_with(|| {
            created = true;
            StageProgress {
                stage,
                percent: 0,
                stage_started: now,
                last_report: now,
                stalled: false,
            }
        });

        let stage_changed = created || entry.stage != stage;
        if stage_changed {
            entry.stage = stage;
            entry.percent = clamped.unwrap_or(0);
            entry.stage_started = now;
        } else if let Some(p) = clamped {
            entry.percent = entry.percent.max(p);
        }

        let stall_cleared = entry.stalled;
        entry.stalled = false;
        entry.last_report = now;

        let elapsed = now.saturating_duration_since(entry.stage_started);
        let eta = estimate_eta(entry.percent, elapsed, eta_seconds);

        ProgressUpdate {
            stage: entry.stage,
            percent: entry.percent,
            eta_seconds: eta,
            total_seconds: eta.map(|e| elapsed.as_secs().saturating_add(e).min(MAX_ETA_SECS)),
            stage_changed,
            stall_cleared,
        }
    }

    /// True if the job has gone longer than the stall timeout without a
    /// report. Marks the entry stalled as a side effect.
    pub fn check_stall(&self, job_id: &str) -> bool {
        self.check_stall_at(job_id, Instant::now())
    }

    pub fn check_stall_at(&self, job_id: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(job_id) {
            Some(entry) => {
                if now.saturating_duration_since(entry.last_report) > self.stall_timeout {
                    entry.stalled = true;
                }
                entry.stalled
            }
            None => false,
        }
    }

    /// Like [`check_stall_at`](Self::check_stall_at) but true only on the
    /// check that first detects the stall.
    pub fn detect_new_stall_at(&self, job_id: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(job_id) {
            Some(entry) if !entry.stalled => {
                if now.saturating_duration_since(entry.last_report) > self.stall_timeout {
                    entry.stalled = true;
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    pub fn is_stalled(&self, job_id: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(job_id).map(|e| e.stalled).unwrap_or(false)
    }

    /// Forgets a job. Called when its run ends, pauses, or resumes.
    pub fn remove(&self, job_id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(job_id);
    }

    pub fn tracked(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }
}

fn clamp_percent(percent: f32) -> Option<u8> {
    if percent.is_nan() {
        return None;
    }
    Some(percent.clamp(0.0, 100.0).round() as u8)
}

/// Provider advice wins when it is usable; otherwise extrapolate linearly
/// from elapsed time. Never negative, never above [`MAX_ETA_SECS`].
fn estimate_eta(percent: u8, elapsed: Duration, advised: Option<f64>) -> Option<u64> {
    if let Some(eta) = advised {
        if eta.is_finite() && eta >= 0.0 {
            return Some((eta.round() as u64).min(MAX_ETA_SECS));
        }
    }
    if percent == 0 {
        return None;
    }
    if percent >= 100 {
        return Some(0);
    }
    let elapsed = elapsed.as_secs_f64();
    let p = f64::from(percent);
    Some(((elapsed * (100.0 - p) / p).round() as u64).min(MAX_ETA_SECS))
}
