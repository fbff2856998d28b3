use serde::{Deserialize, Serialize};

/// The wire dialect a raw chunk stream speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Anthropic,
    Gemini,
    Text,
}

impl ProviderKind {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "openai" | "openai-compatible" => Some(ProviderKind::OpenAi),
            "anthropic" => Some(ProviderKind::Anthropic),
            "gemini" => Some(ProviderKind::Gemini),
            "text" | "plain" => Some(ProviderKind::Text),
            _ => None,
        }
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Unknown,
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl Usage {
    /// Fill a missing total from input + output.
    #[must_use]
    pub fn with_computed_total(mut self) -> Self {
        if self.total_tokens.is_none() {
            if let (Some(input), Some(output)) = (self.input_tokens, self.output_tokens) {
                self.total_tokens = Some(input + output);
            }
        }
        self
    }
}

/// An incremental tool-call fragment. Later fragments for the same `index`
/// usually carry only `arguments`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub arguments: String,
}

/// A single canonical delta produced by a [`super::ChunkAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaEvent {
    ReasoningDelta(String),
    TextDelta(String),
    ToolCallDelta(ToolCallPayload),
    Finish {
        reason: FinishReason,
        usage: Option<Usage>,
    },
}

impl DeltaEvent {
    #[must_use]
    pub fn is_finish(&self) -> bool {
        matches!(self, DeltaEvent::Finish { .. })
    }
}
