//! Periodic stall sweep over running jobs.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Sender};

use crate::progress::ProgressTracker;
use crate::worker::admission::AdmissionController;
use crate::worker::job::JobStatus;

/// Background thread that annotates `processing` jobs as stalled when they
/// stop reporting. Never changes a job's status.
pub struct StallMonitor {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl StallMonitor {
    pub fn start(
        admission: Arc<AdmissionController>,
        tracker: Arc<ProgressTracker>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let ticker = tick(interval.max(Duration::from_millis(10)));

        let handle = thread::Builder::new()
            .name("scribeflow-stall-monitor".into())
            .spawn(move || loop {
                select! {
                    recv(ticker) -> _ => {
                        sweep(&admission, &tracker, Instant::now());
                    }
                    recv(shutdown_rx) -> _ => break,
                }
            })?;

        Ok(Self {
            shutdown: shutdown_tx,
            handle: Some(handle),
        })
    }

    /// Signals the monitor to stop and joins it.
    pub fn stop(&mut self) {
        let _ = self.shutdown.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Stall monitor thread panicked");
            }
        }
    }
}

impl Drop for StallMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One pass: flags every newly stalled `processing` run.
pub fn sweep(admission: &AdmissionController, tracker: &ProgressTracker, now: Instant) -> usize {
    let mut stalled = 0;
    for run in admission.active_runs() {
        if run.status() != JobStatus::Processing {
            continue;
        }
        if tracker.detect_new_stall_at(run.id(), now) {
            run.mark_stalled();
            stalled += 1;
        }
    }
    stalled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelEntry, ModelsConfig};
    use crate::provider::ConfigModelCatalog;
    use crate::store::JobRecordStore;
    use crate::worker::job::{ModelRef, ModelSelection, Stage};
    use crate::worker::run::tests::context;

    #[test]
    fn test_sweep_marks_silent_job() {
        let (ctx, store) = context(Duration::ZERO);
        let catalog = ConfigModelCatalog::new(ModelsConfig {
            transcription: vec![ModelEntry::enabled("whisper", "base")],
            diarization: vec![],
        });
        let admission = AdmissionController::new(1, Arc::new(catalog), Arc::clone(&ctx));
        admission
            .submit(
                "u",
                "a.wav",
                ModelSelection::transcription_only(ModelRef::new("whisper", "base")),
            )
            .unwrap();
        let run = admission.next().unwrap();
        run.dispatch().unwrap();
        run.begin_stage(Stage::Transcribing);

        let later = Instant::now() + ctx.tracker.stall_timeout() + Duration::from_secs(1);
        assert_eq!(sweep(&admission, &ctx.tracker, later), 1);
        // Already annotated; not counted twice.
        assert_eq!(sweep(&admission, &ctx.tracker, later), 0);

        let stored = store.get(run.id()).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
        assert_eq!(stored.stage, Some(Stage::Stalled));
    }

    #[test]
    fn test_monitor_stops() {
        let (ctx, _store) = context(Duration::ZERO);
        let admission = Arc::new(AdmissionController::new(
            1,
            Arc::new(ConfigModelCatalog::default()),
            Arc::clone(&ctx),
        ));
        let mut monitor =
            StallMonitor::start(admission, Arc::clone(&ctx.tracker), Duration::from_millis(10))
                .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        monitor.stop();
        monitor.stop();
    }
}
