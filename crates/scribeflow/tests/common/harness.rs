//! Engine harness for integration tests.
//!
//! `TestEngine` runs a real engine (worker threads, stall monitor, SQLite
//! store) with scripted providers, so tests decide exactly when each stage
//! finishes.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use scribeflow::{
    Engine, EngineBuilder, EngineConfig, Job, JobId, JobQuery, JobStatus, ModelEntry, ModelRef,
    ModelSelection, ModelsConfig, SqliteJobStore,
};

use super::providers::{MemoryResolver, MemorySink, ScriptedProvider};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config(max_concurrency: usize) -> EngineConfig {
    EngineConfig {
        max_concurrency,
        stall_timeout_secs: 60,
        stall_check_interval_ms: 20,
        progress_persist_interval_ms: 0,
        models: ModelsConfig {
            transcription: vec![ModelEntry::enabled("whisper", "base")],
            diarization: vec![ModelEntry::enabled("pyannote", "3.1")],
        },
        ..EngineConfig::default()
    }
}

pub fn asr_only() -> ModelSelection {
    ModelSelection::transcription_only(ModelRef::new("whisper", "base"))
}

pub fn with_diarizer() -> ModelSelection {
    ModelSelection::with_diarizer(
        ModelRef::new("whisper", "base"),
        ModelRef::new("pyannote", "3.1"),
    )
}

pub struct TestEngine {
    pub engine: Engine,
    pub store: Arc<SqliteJobStore>,
    pub transcriber: Arc<ScriptedProvider>,
    pub diarizer: Arc<ScriptedProvider>,
    pub sink: Arc<MemorySink>,
}

impl TestEngine {
    pub fn start(max_concurrency: usize) -> Self {
        Self::with_config(test_config(max_concurrency))
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(SqliteJobStore::in_memory().expect("in-memory store"));
        Self::with_store(config, store)
    }

    /// Starts over an existing store; rows already in it are reconciled.
    pub fn with_store(config: EngineConfig, store: Arc<SqliteJobStore>) -> Self {
        let transcriber = Arc::new(ScriptedProvider::gated());
        let diarizer = Arc::new(ScriptedProvider::gated());
        let sink = Arc::new(MemorySink::default());

        let engine = EngineBuilder::new(config)
            .store(store.clone())
            .source_resolver(Arc::new(MemoryResolver))
            .transcriber(transcriber.clone())
            .diarizer(diarizer.clone())
            .transcript_sink(sink.clone())
            .build()
            .expect("engine should start");

        Self {
            engine,
            store,
            transcriber,
            diarizer,
            sink,
        }
    }

    pub fn submit(&self, source: &str) -> JobId {
        self.engine
            .submit_job("tester", source, asr_only())
            .expect("submission accepted")
    }

    pub fn submit_diarized(&self, source: &str) -> JobId {
        self.engine
            .submit_job("tester", source, with_diarizer())
            .expect("submission accepted")
    }

    pub fn job(&self, id: &str) -> Job {
        self.engine.get_job_status(id).expect("job exists")
    }

    pub fn status(&self, id: &str) -> JobStatus {
        self.job(id).status
    }

    /// Polls the store until `predicate` holds for the job.
    pub fn wait_for<F>(&self, id: &str, what: &str, predicate: F) -> Job
    where
        F: Fn(&Job) -> bool,
    {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let job = self.job(id);
            if predicate(&job) {
                return job;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {} on job {} (last status {}, stage {:?})",
                what,
                id,
                job.status,
                job.stage
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn wait_for_status(&self, id: &str, status: JobStatus) -> Job {
        self.wait_for(id, status.as_str(), |job| job.status == status)
    }

    /// Shuts the engine down while `source` is inside a transcriber call. The
    /// call is finished from another thread once admission has stopped.
    pub fn shutdown_finishing(&self, source: &str) {
        let transcriber = Arc::clone(&self.transcriber);
        let source = source.to_string();
        let finisher = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            transcriber.finish(&source);
        });
        self.engine.shutdown();
        finisher.join().expect("finisher thread");
    }

    /// Number of rows currently `processing`.
    pub fn processing_count(&self) -> u64 {
        self.engine
            .list_jobs(&JobQuery {
                status: Some(JobStatus::Processing),
                ..Default::default()
            })
            .expect("list jobs")
            .total
    }
}

impl Drop for TestEngine {
    fn drop(&mut self) {
        self.transcriber.close();
        self.diarizer.close();
        self.engine.shutdown();
    }
}
