//! Provider doubles gated by crossbeam channels.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use scribeflow::{
    Diarizer, Job, ModelRef, ProgressSink, ProviderError, SourceResolver, SpeakerSegment,
    TranscriptResult, TranscriptSegment, TranscriptSink, Transcriber,
};

/// Instruction for a blocked provider call.
#[derive(Debug, Clone)]
pub enum Step {
    Progress(f32),
    Finish,
    Fail(String),
    Panic,
}

const CALL_DEADLINE: Duration = Duration::from_secs(10);

/// Transcriber and diarizer whose calls block until the test sends a
/// [`Step::Finish`] or [`Step::Fail`] for that source. Steps may be queued
/// before the call starts.
pub struct ScriptedProvider {
    gates: Mutex<HashMap<String, (Sender<Step>, Receiver<Step>)>>,
    calls: Mutex<HashMap<String, usize>>,
    closed: AtomicBool,
    auto_finish: bool,
}

impl ScriptedProvider {
    pub fn gated() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            auto_finish: false,
        }
    }

    /// Every call finishes immediately.
    pub fn instant() -> Self {
        Self {
            auto_finish: true,
            ..Self::gated()
        }
    }

    fn gate(&self, key: &str) -> (Sender<Step>, Receiver<Step>) {
        let mut gates = self.gates.lock().unwrap();
        gates.entry(key.to_string()).or_insert_with(unbounded).clone()
    }

    pub fn step(&self, key: &str, step: Step) {
        self.gate(key).0.send(step).unwrap();
    }

    pub fn finish(&self, key: &str) {
        self.step(key, Step::Finish);
    }

    pub fn fail(&self, key: &str, message: &str) {
        self.step(key, Step::Fail(message.to_string()));
    }

    /// Number of calls made for `key` so far.
    pub fn calls(&self, key: &str) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// Blocks until at least `n` calls for `key` have started.
    pub fn wait_started(&self, key: &str, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.calls(key) < n {
            assert!(
                Instant::now() < deadline,
                "provider call #{} for {} never started",
                n,
                key
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Unblocks every pending and future call so engine shutdown can join.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn run(&self, source: &Path, progress: &dyn ProgressSink) -> Result<(), ProviderError> {
        let key = source.to_string_lossy().to_string();
        *self.calls.lock().unwrap().entry(key.clone()).or_insert(0) += 1;
        progress.report(1.0, None);

        if self.auto_finish {
            progress.report(100.0, Some(0.0));
            return Ok(());
        }

        let (_, rx) = self.gate(&key);
        let deadline = Instant::now() + CALL_DEADLINE;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ProviderError::Cancelled);
            }
            match rx.recv_timeout(Duration::from_millis(10)) {
                Ok(Step::Progress(p)) => progress.report(p, None),
                Ok(Step::Finish) => return Ok(()),
                Ok(Step::Fail(message)) => return Err(ProviderError::Failed(message)),
                Ok(Step::Panic) => panic!("scripted provider panic for {}", key),
                Err(RecvTimeoutError::Timeout) if Instant::now() < deadline => {}
                Err(_) => return Err(ProviderError::Failed(format!("test gate for {} timed out", key))),
            }
        }
    }
}

impl Transcriber for ScriptedProvider {
    fn transcribe(
        &self,
        source: &Path,
        _model: &ModelRef,
        progress: &dyn ProgressSink,
    ) -> Result<TranscriptResult, ProviderError> {
        self.run(source, progress)?;
        Ok(TranscriptResult {
            segments: vec![
                TranscriptSegment::new(0.0, 2.0, "Good morning everyone."),
                TranscriptSegment::new(2.0, 4.0, "Morning!"),
            ],
            language: Some("en".to_string()),
            duration_seconds: Some(4.0),
        })
    }
}

impl Diarizer for ScriptedProvider {
    fn diarize(
        &self,
        source: &Path,
        _model: &ModelRef,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<SpeakerSegment>, ProviderError> {
        self.run(source, progress)?;
        Ok(vec![
            SpeakerSegment {
                start: 0.0,
                end: 2.0,
                speaker: "SPEAKER_00".to_string(),
            },
            SpeakerSegment {
                start: 2.0,
                end: 4.0,
                speaker: "SPEAKER_01".to_string(),
            },
        ])
    }
}

/// Uses the source ref as the media path without touching the filesystem.
pub struct MemoryResolver;

impl SourceResolver for MemoryResolver {
    fn resolve(&self, source_ref: &str, progress: &dyn ProgressSink) -> Result<PathBuf, ProviderError> {
        progress.report(100.0, Some(0.0));
        Ok(PathBuf::from(source_ref))
    }
}

/// Keeps finished transcripts in memory.
#[derive(Default)]
pub struct MemorySink {
    stored: Mutex<HashMap<String, TranscriptResult>>,
}

impl MemorySink {
    pub fn get(&self, job_id: &str) -> Option<TranscriptResult> {
        self.stored.lock().unwrap().get(job_id).cloned()
    }
}

impl TranscriptSink for MemorySink {
    fn store(&self, job: &Job, transcript: &TranscriptResult) -> Result<PathBuf, ProviderError> {
        self.stored
            .lock()
            .unwrap()
            .insert(job.id.clone(), transcript.clone());
        Ok(PathBuf::from(format!("memory/{}.json", job.id)))
    }
}
