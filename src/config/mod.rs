pub mod validation;

use serde::{Deserialize, Serialize};

use crate::protocol::canonical::ProviderKind;
use crate::state::DEFAULT_REGISTRY_SHARDS;
use crate::tags::TagPair;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// A model-id pattern and the tag dialect it selects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDialectConfig {
    /// Case-insensitive regular expression matched anywhere in the model id.
    pub pattern: String,
    #[serde(flatten)]
    pub tags: TagPair,
}

/// Tag dictionary entries layered over the built-in dialects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsConfig {
    /// Replaces the built-in `<think>`/`</think>` fallback when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<TagPair>,
    #[serde(default)]
    pub dialects: Vec<TagDialectConfig>,
}

/// Pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Wire dialect assumed when the caller does not name one.
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_registry_shards")]
    pub registry_shards: usize,
}

fn default_registry_shards() -> usize {
    DEFAULT_REGISTRY_SHARDS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            registry_shards: default_registry_shards(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub tags: TagsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        // The example config should load and validate successfully
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.features.log_level, "INFO");
        assert_eq!(config.pipeline.provider, ProviderKind::OpenAi);
        assert_eq!(config.pipeline.registry_shards, 16);
        assert!(!config.tags.dialects.is_empty());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.features.log_level, "INFO");
        assert_eq!(config.pipeline.registry_shards, DEFAULT_REGISTRY_SHARDS);
        assert!(config.tags.default.is_none());
    }

    #[test]
    fn test_dialect_separator_defaults_to_newline() {
        let yaml = r"
tags:
  dialects:
    - pattern: '^my-model'
      opening_tag: '<reason>'
      closing_tag: '</reason>'
";
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.tags.dialects[0].tags.separator, "\n");
        assert_eq!(config.tags.dialects[0].tags.opening_tag, "<reason>");
    }

    #[test]
    fn test_unknown_provider_is_a_yaml_error() {
        let err = parse_config("pipeline:\n  provider: bedrock\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_config("does-not-exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
