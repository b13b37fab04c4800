//! The job orchestration engine.
//!
//! [`Engine`] wires the store, admission queue, worker pool, progress tracker
//! and stall monitor together and exposes the command API. Build one with
//! [`EngineBuilder`]:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use scribeflow::{EngineBuilder, EngineConfig};
//! # fn transcriber() -> Arc<dyn scribeflow::provider::Transcriber> { unimplemented!() }
//! let engine = EngineBuilder::new(EngineConfig::default())
//!     .transcriber(transcriber())
//!     .build()?;
//! # Ok::<(), scribeflow::EngineError>(())
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::config::{validate_config, EngineConfig};
use crate::db::Database;
use crate::error::{AdmissionError, CommandError, ConfigError, EngineError};
use crate::progress::{ProgressTracker, StallMonitor};
use crate::provider::{
    ConfigModelCatalog, Diarizer, JsonTranscriptSink, LocalFileResolver, ModelCatalog,
    SourceResolver, TranscriptSink, Transcriber,
};
use crate::store::{JobPage, JobQuery, JobRecordStore, SqliteJobStore};
use crate::worker::admission::{AdmissionController, AdmissionStats};
use crate::worker::job::{Job, JobId, ModelSelection};
use crate::worker::lifecycle::LifecycleController;
use crate::worker::pool::WorkerPool;
use crate::worker::run::RunContext;

pub mod reconcile;
pub mod router;

pub use reconcile::{reconcile, ReconcileReport};
pub use router::CommandRouter;

pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn JobRecordStore>>,
    catalog: Option<Arc<dyn ModelCatalog>>,
    resolver: Option<Arc<dyn SourceResolver>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    diarizer: Option<Arc<dyn Diarizer>>,
    sink: Option<Arc<dyn TranscriptSink>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            catalog: None,
            resolver: None,
            transcriber: None,
            diarizer: None,
            sink: None,
        }
    }

    /// Defaults to a SQLite store at the configured database path.
    pub fn store(mut self, store: Arc<dyn JobRecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to the `models` section of the config.
    pub fn catalog(mut self, catalog: Arc<dyn ModelCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn source_resolver(mut self, resolver: Arc<dyn SourceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn diarizer(mut self, diarizer: Arc<dyn Diarizer>) -> Self {
        self.diarizer = Some(diarizer);
        self
    }

    pub fn transcript_sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Reconciles the store, then starts workers and the stall monitor.
    pub fn build(self) -> Result<Engine, EngineError> {
        let config = self.config;
        validate_config(&config)?;

        let transcriber = self.transcriber.ok_or_else(|| ConfigError::Validation {
            message: "a transcription provider is required".to_string(),
        })?;

        let store: Arc<dyn JobRecordStore> = match self.store {
            Some(store) => store,
            None => {
                let db = match config.resolved_database_path() {
                    Some(path) => Database::open(&path)?,
                    None => {
                        log::warn!("No database path available; job records are in-memory only");
                        Database::open_in_memory()?
                    }
                };
                Arc::new(SqliteJobStore::new(db))
            }
        };
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(ConfigModelCatalog::new(config.models.clone())));
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(LocalFileResolver::new()));
        let sink = match self.sink {
            Some(sink) => sink,
            None => Arc::new(JsonTranscriptSink::new(output_directory(&config)?)),
        };

        let tracker = Arc::new(ProgressTracker::new(config.stall_timeout()));
        let broadcaster = JobProgressBroadcaster::new(config.broadcast_capacity);
        let ctx = Arc::new(RunContext {
            store: Arc::clone(&store),
            tracker: Arc::clone(&tracker),
            broadcaster: broadcaster.clone(),
            persist_interval: config.progress_persist_interval(),
        });

        let mut admission = AdmissionController::new(config.max_concurrency, catalog, ctx);
        if self.diarizer.is_none() {
            admission = admission.without_diarizer();
        }
        let admission = Arc::new(admission);
        reconcile(&admission)?;

        let controller = Arc::new(LifecycleController::new(
            resolver,
            transcriber,
            self.diarizer,
            sink,
        ));
        let pool = WorkerPool::start(Arc::clone(&admission), controller, config.max_concurrency)?;
        let monitor = match StallMonitor::start(
            Arc::clone(&admission),
            tracker,
            config.stall_check_interval(),
        ) {
            Ok(monitor) => monitor,
            Err(e) => {
                pool.shutdown();
                pool.wait();
                return Err(EngineError::Spawn {
                    name: "scribeflow-stall-monitor".to_string(),
                    source: e,
                });
            }
        };

        log::info!(
            "Engine started: {} slots, stall timeout {:?}",
            config.max_concurrency,
            config.stall_timeout()
        );

        Ok(Engine {
            router: CommandRouter::new(Arc::clone(&admission)),
            admission,
            broadcaster,
            runtime: Mutex::new(Some(Runtime { pool, monitor })),
        })
    }
}

fn output_directory(config: &EngineConfig) -> Result<PathBuf, EngineError> {
    if let Some(dir) = &config.output_directory {
        return Ok(dir.clone());
    }
    dirs::home_dir()
        .map(|home| home.join(".scribeflow").join("transcripts"))
        .ok_or_else(|| {
            ConfigError::Validation {
                message: "outputDirectory is required when no home directory is available"
                    .to_string(),
            }
            .into()
        })
}

struct Runtime {
    pool: WorkerPool,
    monitor: StallMonitor,
}

pub struct Engine {
    router: CommandRouter,
    admission: Arc<AdmissionController>,
    broadcaster: JobProgressBroadcaster,
    runtime: Mutex<Option<Runtime>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    pub fn submit_job(
        &self,
        owner: &str,
        source_ref: &str,
        models: ModelSelection,
    ) -> Result<JobId, AdmissionError> {
        self.router.submit(owner, source_ref, models)
    }

    pub fn cancel_job(&self, id: &str) -> Result<(), CommandError> {
        self.router.cancel(id)
    }

    pub fn pause_job(&self, id: &str) -> Result<(), CommandError> {
        self.router.pause(id)
    }

    pub fn resume_job(&self, id: &str) -> Result<(), CommandError> {
        self.router.resume(id)
    }

    pub fn restart_job(&self, id: &str) -> Result<JobId, CommandError> {
        self.router.restart(id)
    }

    pub fn get_job_status(&self, id: &str) -> Result<Job, CommandError> {
        self.router.status(id)
    }

    pub fn list_jobs(&self, query: &JobQuery) -> Result<JobPage, CommandError> {
        self.router.list(query)
    }

    pub fn queue_position(&self, id: &str) -> Option<usize> {
        self.router.queue_position(id)
    }

    pub fn stats(&self) -> AdmissionStats {
        self.admission.stats()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.broadcaster.subscribe()
    }

    /// Stops admission, lets in-flight stages return, and joins every
    /// thread. Jobs still queued stay `queued` for the next start.
    pub fn shutdown(&self) {
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut runtime) = runtime {
            runtime.monitor.stop();
            runtime.pool.shutdown();
            runtime.pool.wait();
            log::info!("Engine stopped");
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
