//! Drives one job through `uploading -> transcribing -> diarizing ->
//! finalizing`.
//!
//! Provider calls are never interrupted. Pause and cancel signals are only
//! acted on at the boundaries between stages; a paused job starts over from
//! the first stage when it is resumed.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info_span;

use crate::provider::{
    assign_speakers, Diarizer, ProviderError, SourceResolver, SpeakerSegment, TranscriptSink,
    Transcriber,
};
use crate::worker::job::{ErrorCode, JobOutput, Stage};
use crate::worker::run::{ActiveRun, Checkpoint, RunOutcome, StageSink};

pub struct LifecycleController {
    resolver: Arc<dyn SourceResolver>,
    transcriber: Arc<dyn Transcriber>,
    diarizer: Option<Arc<dyn Diarizer>>,
    sink: Arc<dyn TranscriptSink>,
}

/// Early exit from the stage sequence.
enum Interrupt {
    Checkpoint(Checkpoint),
    Provider(ProviderError),
}

impl From<ProviderError> for Interrupt {
    fn from(e: ProviderError) -> Self {
        Interrupt::Provider(e)
    }
}

impl LifecycleController {
    pub fn new(
        resolver: Arc<dyn SourceResolver>,
        transcriber: Arc<dyn Transcriber>,
        diarizer: Option<Arc<dyn Diarizer>>,
        sink: Arc<dyn TranscriptSink>,
    ) -> Self {
        Self {
            resolver,
            transcriber,
            diarizer,
            sink,
        }
    }

    /// Runs the job until it finishes, fails, or hits a signal at a
    /// checkpoint. The returned outcome is recorded when the slot is released.
    pub fn run(&self, run: &ActiveRun) -> RunOutcome {
        let job = run.snapshot();
        let span = info_span!("job", job_id = %job.id, owner = %job.owner);
        let _enter = span.enter();

        match run.dispatch() {
            Ok(true) => {}
            Ok(false) => {
                log::info!("Job {} cancelled before dispatch", job.id);
                return RunOutcome::Cancelled;
            }
            Err(e) => {
                log::error!("Failed to dispatch job {}: {}", job.id, e);
                return RunOutcome::Aborted;
            }
        }

        match self.stages(run) {
            Ok(output) => RunOutcome::Completed(output),
            Err(Interrupt::Checkpoint(Checkpoint::Cancel)) => RunOutcome::Cancelled,
            Err(Interrupt::Checkpoint(Checkpoint::Pause)) => RunOutcome::Paused,
            Err(Interrupt::Provider(ProviderError::Cancelled))
                if run.signals().cancel_requested() =>
            {
                RunOutcome::Cancelled
            }
            Err(Interrupt::Provider(e)) => RunOutcome::Failed {
                message: e.to_string(),
                code: ErrorCode::ProviderError,
            },
        }
    }

    fn stages(&self, run: &ActiveRun) -> Result<JobOutput, Interrupt> {
        let job = run.snapshot();

        let source: PathBuf = {
            let _span = info_span!("upload").entered();
            run.begin_stage(Stage::Uploading);
            self.resolver
                .resolve(&job.source_ref, &StageSink::new(run, Stage::Uploading))?
        };
        checkpoint(run)?;

        let mut transcript = {
            let _span = info_span!("transcribe", model = %job.models.asr).entered();
            run.begin_stage(Stage::Transcribing);
            self.transcriber.transcribe(
                &source,
                &job.models.asr,
                &StageSink::new(run, Stage::Transcribing),
            )?
        };
        checkpoint(run)?;

        let mut speakers: Vec<SpeakerSegment> = Vec::new();
        if let Some(model) = &job.models.diarizer {
            let _span = info_span!("diarize", model = %model).entered();
            let diarizer = self.diarizer.as_ref().ok_or_else(|| {
                ProviderError::Failed(format!("no diarization provider available for {}", model))
            })?;
            run.begin_stage(Stage::Diarizing);
            speakers = diarizer.diarize(&source, model, &StageSink::new(run, Stage::Diarizing))?;
            checkpoint(run)?;
        }

        let output = {
            let _span = info_span!("finalize").entered();
            run.begin_stage(Stage::Finalizing);
            let speaker_count = if job.wants_diarization() {
                Some(assign_speakers(&mut transcript.segments, &speakers))
            } else {
                None
            };
            let path = self.sink.store(&job, &transcript)?;
            run.report_progress(Stage::Finalizing, 100.0, Some(0.0));

            JobOutput {
                transcript_path: Some(path),
                language: transcript.language.clone(),
                duration_seconds: transcript.duration_seconds,
                speaker_count,
            }
        };
        checkpoint(run)?;

        Ok(output)
    }
}

fn checkpoint(run: &ActiveRun) -> Result<(), Interrupt> {
    match run.checkpoint() {
        Some(signal) => {
            log::info!("Job {} reached checkpoint with {:?} pending", run.id(), signal);
            Err(Interrupt::Checkpoint(signal))
        }
        None => Ok(()),
    }
}
