use super::{AppConfig, ConfigError};
use crate::tags::TagPair;

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_log_level(config)?;
    validate_tags(config)?;
    validate_pipeline(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

fn validate_tag_pair(field: &str, tags: &TagPair) -> Result<(), ConfigError> {
    if tags.opening_tag.is_empty() {
        return Err(validation_err(format!("{field}.opening_tag cannot be empty")));
    }
    if tags.closing_tag.is_empty() {
        return Err(validation_err(format!("{field}.closing_tag cannot be empty")));
    }
    Ok(())
}

fn validate_tags(config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(default) = &config.tags.default {
        validate_tag_pair("tags.default", default)?;
    }
    for (i, dialect) in config.tags.dialects.iter().enumerate() {
        if dialect.pattern.trim().is_empty() {
            return Err(validation_err(format!(
                "tags.dialects[{i}].pattern cannot be empty"
            )));
        }
        if let Err(e) = regex_lite::Regex::new(&dialect.pattern) {
            return Err(validation_err(format!(
                "tags.dialects[{i}].pattern '{}' is not a valid regex: {e}",
                dialect.pattern
            )));
        }
        validate_tag_pair(&format!("tags.dialects[{i}]"), &dialect.tags)?;
    }
    Ok(())
}

fn validate_pipeline(config: &AppConfig) -> Result<(), ConfigError> {
    if config.pipeline.registry_shards == 0 {
        return Err(validation_err(
            "pipeline.registry_shards must be greater than 0",
        ));
    }
    Ok(())
}
