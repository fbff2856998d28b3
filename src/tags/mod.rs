pub mod scanner;

pub use scanner::find_potential_start;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, TagsConfig};

/// Matched opening/closing delimiters of a reasoning span, plus the separator
/// inserted when a mode resumes after a switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPair {
    pub opening_tag: String,
    pub closing_tag: String,
    #[serde(default = "default_separator")]
    pub separator: String,
}

pub(crate) fn default_separator() -> String {
    "\n".to_string()
}

impl TagPair {
    #[must_use]
    pub fn new(opening_tag: &str, closing_tag: &str, separator: &str) -> Self {
        Self {
            opening_tag: opening_tag.to_string(),
            closing_tag: closing_tag.to_string(),
            separator: separator.to_string(),
        }
    }

    /// `<think>` / `</think>`, used by DeepSeek-R1, Qwen3, QwQ and most
    /// open-weight reasoning models.
    #[must_use]
    pub fn think() -> Self {
        Self::new("<think>", "</think>", "\n")
    }

    /// Longest number of bytes a pending partial tag can occupy.
    #[must_use]
    pub fn max_partial_len(&self) -> usize {
        self.opening_tag
            .len()
            .max(self.closing_tag.len())
            .saturating_sub(1)
    }
}

impl Default for TagPair {
    fn default() -> Self {
        Self::think()
    }
}

/// Built-in model families that speak a non-default tag dialect.
const BUILTIN_DIALECTS: &[(&str, &str, &str)] = &[
    ("kimi", "◁think▷", "◁/think▷"),
    ("seed-oss", "<seed:think>", "</seed:think>"),
    ("gemma", "<thought>", "</thought>"),
    ("baichuan-m1", "###Thinking", "###Response"),
];

#[derive(Debug, Clone)]
struct DialectRule {
    pattern: Regex,
    tags: TagPair,
}

/// Pure lookup from a model identifier to the [`TagPair`] it emits.
///
/// Rules are tried in order (configured rules first, then built-ins); the
/// first pattern that matches anywhere in the model id wins. Unknown models
/// get the default pair. Lookup never fails.
#[derive(Debug, Clone)]
pub struct TagDictionary {
    default: TagPair,
    rules: Vec<DialectRule>,
}

impl TagDictionary {
    /// Dictionary with only the built-in dialects.
    #[must_use]
    pub fn builtin() -> Self {
        let rules = BUILTIN_DIALECTS
            .iter()
            .filter_map(|(pattern, open, close)| {
                // Built-in patterns are plain literals and always compile.
                let pattern = Regex::new(&format!("(?i){}", regex_lite::escape(pattern))).ok()?;
                Some(DialectRule {
                    pattern,
                    tags: TagPair::new(open, close, "\n"),
                })
            })
            .collect();
        Self {
            default: TagPair::default(),
            rules,
        }
    }

    /// Dictionary from configuration, layered over the built-ins.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when a dialect pattern is not a
    /// valid regular expression.
    pub fn from_config(config: &TagsConfig) -> Result<Self, ConfigError> {
        let mut dictionary = Self::builtin();
        if let Some(default) = &config.default {
            dictionary.default = default.clone();
        }

        let mut configured = Vec::with_capacity(config.dialects.len());
        for dialect in &config.dialects {
            let pattern = Regex::new(&format!("(?i){}", dialect.pattern)).map_err(|e| {
                ConfigError::Validation(format!(
                    "tags.dialects pattern '{}' is invalid: {e}",
                    dialect.pattern
                ))
            })?;
            configured.push(DialectRule {
                pattern,
                tags: dialect.tags.clone(),
            });
        }
        configured.append(&mut dictionary.rules);
        dictionary.rules = configured;
        Ok(dictionary)
    }

    #[must_use]
    pub fn lookup(&self, model_id: &str) -> &TagPair {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(model_id))
            .map_or(&self.default, |rule| &rule.tags)
    }

    #[must_use]
    pub fn default_pair(&self) -> &TagPair {
        &self.default
    }
}

impl Default for TagDictionary {
    fn default() -> Self {
        Self::builtin()
    }
}
