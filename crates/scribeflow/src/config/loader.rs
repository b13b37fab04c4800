use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::{EngineConfig, ModelEntry};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/engine-config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: EngineConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express.
pub fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.max_concurrency == 0 {
        return Err(ConfigError::Validation {
            message: "maxConcurrency must be at least 1".to_string(),
        });
    }
    if config.stall_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "stallTimeoutSecs must be at least 1".to_string(),
        });
    }
    if config.broadcast_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "broadcastCapacity must be at least 1".to_string(),
        });
    }

    validate_model_entries("transcription", &config.models.transcription)?;
    validate_model_entries("diarization", &config.models.diarization)?;

    let cpus = num_cpus::get();
    if config.max_concurrency > cpus {
        log::warn!(
            "maxConcurrency {} exceeds the {} available CPUs; inference will contend",
            config.max_concurrency,
            cpus
        );
    }

    Ok(())
}

fn validate_model_entries(kind: &str, entries: &[ModelEntry]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for entry in entries {
        if entry.provider.trim().is_empty() || entry.model.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: format!("{} model entries need a provider and a model name", kind),
            });
        }
        if !seen.insert((entry.provider.as_str(), entry.model.as_str())) {
            return Err(ConfigError::Validation {
                message: format!(
                    "Duplicate {} model '{}/{}'",
                    kind, entry.provider, entry.model
                ),
            });
        }
    }
    Ok(())
}
