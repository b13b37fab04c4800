use crate::config::{ModelEntry, ModelsConfig};
use crate::worker::job::ModelRef;

/// Registry of models the engine may dispatch to.
pub trait ModelCatalog: Send + Sync {
    fn has_enabled_transcriber(&self) -> bool;

    fn transcriber_enabled(&self, model: &ModelRef) -> bool;

    fn diarizer_enabled(&self, model: &ModelRef) -> bool;
}

/// Catalog read from the `models` section of the engine config.
#[derive(Debug, Clone, Default)]
pub struct ConfigModelCatalog {
    models: ModelsConfig,
}

impl ConfigModelCatalog {
    pub fn new(models: ModelsConfig) -> Self {
        Self { models }
    }
}

fn is_enabled(entries: &[ModelEntry], model: &ModelRef) -> bool {
    entries
        .iter()
        .any(|e| e.enabled && e.provider == model.provider && e.model == model.model)
}

impl ModelCatalog for ConfigModelCatalog {
    fn has_enabled_transcriber(&self) -> bool {
        self.models.transcription.iter().any(|e| e.enabled)
    }

    fn transcriber_enabled(&self, model: &ModelRef) -> bool {
        is_enabled(&self.models.transcription, model)
    }

    fn diarizer_enabled(&self, model: &ModelRef) -> bool {
        is_enabled(&self.models.diarization, model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ConfigModelCatalog {
        ConfigModelCatalog::new(ModelsConfig {
            transcription: vec![
                ModelEntry::enabled("whisper", "base"),
                ModelEntry {
                    provider: "whisper".into(),
                    model: "large-v3".into(),
                    enabled: false,
                },
            ],
            diarization: vec![ModelEntry::enabled("pyannote", "3.1")],
        })
    }

    #[test]
    fn test_enabled_lookup() {
        let catalog = catalog();
        assert!(catalog.has_enabled_transcriber());
        assert!(catalog.transcriber_enabled(&ModelRef::new("whisper", "base")));
        assert!(!catalog.transcriber_enabled(&ModelRef::new("whisper", "large-v3")));
        assert!(!catalog.transcriber_enabled(&ModelRef::new("other", "base")));
        assert!(catalog.diarizer_enabled(&ModelRef::new("pyannote", "3.1")));
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = ConfigModelCatalog::default();
        assert!(!catalog.has_enabled_transcriber());
    }
}
