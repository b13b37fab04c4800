use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{ProgressSink, ProviderError, SourceResolver, TranscriptResult, TranscriptSink};
use crate::worker::job::Job;

/// Resolves `source_ref` as a path on the local filesystem, optionally
/// relative to an upload directory.
pub struct LocalFileResolver {
    base_directory: Option<PathBuf>,
}

impl LocalFileResolver {
    pub fn new() -> Self {
        Self {
            base_directory: None,
        }
    }

    pub fn with_base<P: AsRef<Path>>(base_directory: P) -> Self {
        Self {
            base_directory: Some(base_directory.as_ref().to_path_buf()),
        }
    }
}

impl Default for LocalFileResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceResolver for LocalFileResolver {
    fn resolve(&self, source_ref: &str, progress: &dyn ProgressSink) -> Result<PathBuf, ProviderError> {
        let candidate = Path::new(source_ref);
        let path = match &self.base_directory {
            Some(base) if candidate.is_relative() => base.join(candidate),
            _ => candidate.to_path_buf(),
        };

        if !path.is_file() {
            return Err(ProviderError::InvalidInput(format!(
                "source media not found: {}",
                path.display()
            )));
        }

        progress.report(100.0, Some(0.0));
        Ok(path)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptDocument<'a> {
    job_id: &'a str,
    source_ref: &'a str,
    #[serde(flatten)]
    transcript: &'a TranscriptResult,
}

/// Writes `<output_directory>/<job id>.json`.
pub struct JsonTranscriptSink {
    output_directory: PathBuf,
}

impl JsonTranscriptSink {
    pub fn new<P: AsRef<Path>>(output_directory: P) -> Self {
        Self {
            output_directory: output_directory.as_ref().to_path_buf(),
        }
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }
}

impl TranscriptSink for JsonTranscriptSink {
    fn store(&self, job: &Job, transcript: &TranscriptResult) -> Result<PathBuf, ProviderError> {
        std::fs::create_dir_all(&self.output_directory).map_err(|e| {
            ProviderError::Failed(format!(
                "failed to create output directory {}: {}",
                self.output_directory.display(),
                e
            ))
        })?;

        let document = TranscriptDocument {
            job_id: &job.id,
            source_ref: &job.source_ref,
            transcript,
        };
        let body = serde_json::to_vec_pretty(&document)
            .map_err(|e| ProviderError::Failed(format!("failed to encode transcript: {}", e)))?;

        // Write to a temp name first so readers never see a partial file.
        let final_path = self.output_directory.join(format!("{}.json", job.id));
        let tmp_path = self.output_directory.join(format!(".{}.json.tmp", job.id));
        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&body)?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, &final_path)
        };
        write().map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            ProviderError::Failed(format!(
                "failed to write transcript {}: {}",
                final_path.display(),
                e
            ))
        })?;

        Ok(final_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{NoopProgress, TranscriptSegment};
    use crate::worker::job::{ModelRef, ModelSelection};

    #[test]
    fn test_resolver_relative_to_base() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("call.wav"), b"RIFF").unwrap();

        let resolver = LocalFileResolver::with_base(dir.path());
        let path = resolver.resolve("call.wav", &NoopProgress).unwrap();
        assert_eq!(path, dir.path().join("call.wav"));

        let err = resolver.resolve("missing.wav", &NoopProgress).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidInput(_)));
    }

    #[test]
    fn test_json_sink_writes_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonTranscriptSink::new(dir.path().join("out"));
        let job = Job::new(
            "alice",
            "call.wav",
            ModelSelection::transcription_only(ModelRef::new("whisper", "base")),
        );
        let transcript = TranscriptResult {
            segments: vec![TranscriptSegment::new(0.0, 1.5, "hello")],
            language: Some("en".into()),
            duration_seconds: Some(1.5),
        };

        let path = sink.store(&job, &transcript).unwrap();
        assert_eq!(path, dir.path().join("out").join(format!("{}.json", job.id)));

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["jobId"], job.id.as_str());
        assert_eq!(written["language"], "en");
        assert_eq!(written["segments"][0]["text"], "hello");
    }
}
