use crate::error::PipelineError;
use crate::protocol::canonical::{DeltaEvent, FinishReason, ToolCallPayload, Usage};
use crate::protocol::mapping::{anthropic_stop_to_canonical, anthropic_usage_to_canonical};
use crate::protocol::ChunkAdapter;
use crate::stream::RawChunk;

use super::{AnthropicContentBlock, AnthropicDelta, AnthropicStreamEvent};

/// Adapter for Anthropic Messages streams.
///
/// Anthropic reports the stop reason and final usage in `message_delta` but
/// terminates with `message_stop`, so both are held until the stop event.
#[derive(Debug, Default)]
pub struct AnthropicChunkAdapter {
    input_tokens: u64,
    output_tokens: u64,
    saw_usage: bool,
    stop_reason: Option<FinishReason>,
    finished: bool,
}

impl AnthropicChunkAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn usage(&self) -> Option<Usage> {
        self.saw_usage
            .then(|| anthropic_usage_to_canonical(self.input_tokens, self.output_tokens))
    }
}

/// Parse an Anthropic SSE event payload.
///
/// The `event:` name is advisory; the JSON `type` field is authoritative.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedChunk`] when the payload is not JSON or
/// a known event type is missing required fields. Unlisted event types parse
/// as [`AnthropicStreamEvent::Unknown`].
pub fn parse_anthropic_event(data: &str) -> Result<AnthropicStreamEvent, PipelineError> {
    serde_json::from_str(data).map_err(|e| PipelineError::malformed("anthropic event", &e))
}

impl ChunkAdapter for AnthropicChunkAdapter {
    fn adapt(&mut self, chunk: &RawChunk, out: &mut Vec<DeltaEvent>) -> Result<(), PipelineError> {
        if self.finished || chunk.data.trim().is_empty() {
            return Ok(());
        }
        let event = parse_anthropic_event(&chunk.data)?;
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.input_tokens = message.usage.input_tokens;
                self.output_tokens = message.usage.output_tokens;
                self.saw_usage = true;
            }
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                AnthropicContentBlock::Thinking { thinking } => {
                    if !thinking.is_empty() {
                        out.push(DeltaEvent::ReasoningDelta(thinking));
                    }
                }
                AnthropicContentBlock::Text { text } => {
                    if !text.is_empty() {
                        out.push(DeltaEvent::TextDelta(text));
                    }
                }
                AnthropicContentBlock::ToolUse { id, name, .. } => {
                    out.push(DeltaEvent::ToolCallDelta(ToolCallPayload {
                        index,
                        id: Some(id),
                        name: Some(name),
                        arguments: String::new(),
                    }));
                }
                AnthropicContentBlock::RedactedThinking { .. } | AnthropicContentBlock::Unknown => {}
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicDelta::ThinkingDelta { thinking } => {
                    out.push(DeltaEvent::ReasoningDelta(thinking));
                }
                AnthropicDelta::TextDelta { text } => {
                    out.push(DeltaEvent::TextDelta(text));
                }
                AnthropicDelta::InputJsonDelta { partial_json } => {
                    out.push(DeltaEvent::ToolCallDelta(ToolCallPayload {
                        index,
                        id: None,
                        name: None,
                        arguments: partial_json,
                    }));
                }
                AnthropicDelta::SignatureDelta { .. } | AnthropicDelta::Unknown => {}
            },
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    // message_delta usage is cumulative for output, absent for input.
                    if usage.input_tokens > 0 {
                        self.input_tokens = usage.input_tokens;
                    }
                    self.output_tokens = usage.output_tokens;
                    self.saw_usage = true;
                }
                if let Some(reason) = delta.stop_reason.as_deref() {
                    self.stop_reason = Some(anthropic_stop_to_canonical(reason));
                }
            }
            AnthropicStreamEvent::MessageStop {} => {
                self.finished = true;
                out.push(DeltaEvent::Finish {
                    reason: self.stop_reason.unwrap_or(FinishReason::Unknown),
                    usage: self.usage(),
                });
            }
            AnthropicStreamEvent::ContentBlockStop { .. }
            | AnthropicStreamEvent::Ping {}
            | AnthropicStreamEvent::Unknown => {}
            AnthropicStreamEvent::Error { error } => {
                return Err(PipelineError::Upstream(format!(
                    "{}: {}",
                    error.type_, error.message
                )));
            }
        }
        Ok(())
    }
}
