use serde::Serialize;

use crate::error::PipelineError;
use crate::protocol::canonical::{FinishReason, ToolCallPayload, Usage};

/// A typed notification describing pipeline progress, delivered to the sink
/// in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LifecycleEvent {
    ResponseCreated {
        message_id: String,
        model: String,
    },
    ThinkingDelta {
        text: String,
        elapsed_ms: u64,
    },
    ThinkingComplete {
        text: String,
        elapsed_ms: u64,
    },
    TextDelta {
        text: String,
    },
    TextComplete {
        text: String,
    },
    ToolCallDelta {
        payload: ToolCallPayload,
    },
    BlockComplete {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseSummary>,
    },
    Error {
        error: PipelineError,
    },
}

impl LifecycleEvent {
    /// The serialized `type` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::ResponseCreated { .. } => "response-created",
            LifecycleEvent::ThinkingDelta { .. } => "thinking-delta",
            LifecycleEvent::ThinkingComplete { .. } => "thinking-complete",
            LifecycleEvent::TextDelta { .. } => "text-delta",
            LifecycleEvent::TextComplete { .. } => "text-complete",
            LifecycleEvent::ToolCallDelta { .. } => "tool-call-delta",
            LifecycleEvent::BlockComplete { .. } => "block-complete",
            LifecycleEvent::Error { .. } => "error",
        }
    }
}

/// Final state of a completed response, carried by `block-complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseSummary {
    pub message_id: String,
    pub model: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub finish_reason: FinishReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallPayload>,
    /// Request start to first reasoning or answer token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_token_ms: Option<u64>,
    /// First token to the end of reasoning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_ms: Option<u64>,
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed(ResponseSummary),
    Failed(PipelineError),
    /// Cancelled; the caller should mark the message as interrupted.
    Aborted,
}

impl PipelineOutcome {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, PipelineOutcome::Completed(_))
    }

    #[must_use]
    pub fn summary(&self) -> Option<&ResponseSummary> {
        match self {
            PipelineOutcome::Completed(summary) => Some(summary),
            _ => None,
        }
    }
}

/// Receives lifecycle events. Any `FnMut(LifecycleEvent)` is a sink.
pub trait EventSink {
    fn emit(&mut self, event: LifecycleEvent);
}

impl<F> EventSink for F
where
    F: FnMut(LifecycleEvent),
{
    fn emit(&mut self, event: LifecycleEvent) {
        self(event);
    }
}

/// Fold a tool-call fragment into the calls collected so far, keyed by index.
pub(crate) fn merge_tool_call(calls: &mut Vec<ToolCallPayload>, fragment: &ToolCallPayload) {
    match calls.iter_mut().find(|call| call.index == fragment.index) {
        Some(call) => {
            if call.id.is_none() {
                call.id.clone_from(&fragment.id);
            }
            if call.name.is_none() {
                call.name.clone_from(&fragment.name);
            }
            call.arguments.push_str(&fragment.arguments);
        }
        None => calls.push(fragment.clone()),
    }
}
