use serde::{Serialize, Serializer};

/// Error type shared by the chunk source, adapters and the segment transformer.
///
/// Cloneable so a failure can travel to the sink inside
/// [`crate::pipeline::LifecycleEvent::Error`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("Adapter error: {0}")]
    Adapter(String),
    #[error("Malformed chunk: {0}")]
    MalformedChunk(String),
    #[error("Upstream error: {0}")]
    Upstream(String),
    #[error("Source error: {0}")]
    Source(String),
    #[error("Invalid tag pair: {0}")]
    InvalidTags(String),
    #[error("Aborted")]
    Aborted,
}

/// Broad error category, used for log fields and the serialized error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Adapter,
    Upstream,
    Source,
    Transformer,
    Cancelled,
}

impl PipelineError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::Adapter(_) | PipelineError::MalformedChunk(_) => ErrorCategory::Adapter,
            PipelineError::Upstream(_) => ErrorCategory::Upstream,
            PipelineError::Source(_) => ErrorCategory::Source,
            PipelineError::InvalidTags(_) => ErrorCategory::Transformer,
            PipelineError::Aborted => ErrorCategory::Cancelled,
        }
    }

    /// Cancellation is an outcome, not a failure.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, PipelineError::Aborted)
    }

    pub(crate) fn malformed(context: &str, err: &serde_json::Error) -> Self {
        PipelineError::MalformedChunk(format!("{context}: {err}"))
    }
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Adapter => "adapter",
            ErrorCategory::Upstream => "upstream",
            ErrorCategory::Source => "source",
            ErrorCategory::Transformer => "transformer",
            ErrorCategory::Cancelled => "cancelled",
        }
    }
}

impl Serialize for PipelineError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("PipelineError", 2)?;
        state.serialize_field("kind", self.category().as_str())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}
