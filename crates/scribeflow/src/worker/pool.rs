use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info};

use crate::error::EngineError;
use crate::worker::admission::AdmissionController;
use crate::worker::job::ErrorCode;
use crate::worker::lifecycle::LifecycleController;
use crate::worker::run::RunOutcome;

/// Fixed set of worker threads, one per concurrency slot.
pub struct WorkerPool {
    admission: Arc<AdmissionController>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(
        admission: Arc<AdmissionController>,
        controller: Arc<LifecycleController>,
        worker_count: usize,
    ) -> Result<Self, EngineError> {
        let worker_count = worker_count.max(1);
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let worker_admission = Arc::clone(&admission);
            let worker_controller = Arc::clone(&controller);
            let name = format!("scribeflow-worker-{}", worker_id);

            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_worker(worker_id, worker_admission, worker_controller))
                .map_err(|e| EngineError::Spawn { name, source: e });

            match handle {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Don't leave the already-started workers blocked forever.
                    admission.shutdown();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(e);
                }
            }
        }

        info!("Started {} workers", worker_count);

        Ok(Self { admission, workers })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.admission.shutdown();
    }

    /// Joins every worker. In-flight stages run to completion first.
    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

fn run_worker(
    worker_id: usize,
    admission: Arc<AdmissionController>,
    controller: Arc<LifecycleController>,
) {
    debug!("Worker {} started", worker_id);

    while let Some(run) = admission.next() {
        debug!("Worker {} picked up job {}", worker_id, run.id());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| controller.run(&run)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!("Worker {} panicked on job {}: {}", worker_id, run.id(), message);
                RunOutcome::Failed {
                    message: format!("internal error: {}", message),
                    code: ErrorCode::InternalError,
                }
            });

        admission.release(&run, outcome);
    }

    debug!("Worker {} received shutdown signal", worker_id);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
