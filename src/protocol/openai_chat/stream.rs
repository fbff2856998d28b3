use crate::error::PipelineError;
use crate::protocol::canonical::{DeltaEvent, FinishReason, ToolCallPayload};
use crate::protocol::mapping::{openai_finish_to_canonical, openai_usage_to_canonical};
use crate::protocol::ChunkAdapter;
use crate::stream::RawChunk;

use super::OpenAiStreamChunk;

/// Adapter for OpenAI-compatible `chat.completion.chunk` streams.
#[derive(Debug, Default)]
pub struct OpenAiChunkAdapter {
    finished: bool,
}

impl OpenAiChunkAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkAdapter for OpenAiChunkAdapter {
    fn adapt(&mut self, chunk: &RawChunk, out: &mut Vec<DeltaEvent>) -> Result<(), PipelineError> {
        if self.finished {
            return Ok(());
        }
        if chunk.is_done() {
            self.finished = true;
            out.push(DeltaEvent::Finish {
                reason: FinishReason::Unknown,
                usage: None,
            });
            return Ok(());
        }
        if chunk.data.trim().is_empty() {
            return Ok(());
        }

        let parsed: OpenAiStreamChunk = serde_json::from_str(&chunk.data)
            .map_err(|e| PipelineError::malformed("openai chunk", &e))?;
        decode_openai_stream_chunk_into(parsed, out)?;
        self.finished = out.iter().any(DeltaEvent::is_finish);
        Ok(())
    }
}

/// Decode an `OpenAI` stream chunk into canonical deltas.
///
/// Only the first choice is considered. Within it the order is fixed:
/// reasoning, content, tool calls, finish.
///
/// # Errors
///
/// Returns [`PipelineError::Upstream`] when the chunk carries an `error` object.
pub fn decode_openai_stream_chunk_into(
    chunk: OpenAiStreamChunk,
    out: &mut Vec<DeltaEvent>,
) -> Result<(), PipelineError> {
    if let Some(error) = chunk.error {
        return Err(PipelineError::Upstream(error.message));
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(());
    };

    let delta = choice.delta;
    if let Some(reasoning) = delta.reasoning_content.or(delta.reasoning) {
        if !reasoning.is_empty() {
            out.push(DeltaEvent::ReasoningDelta(reasoning));
        }
    }

    if let Some(content) = delta.content {
        if !content.is_empty() {
            out.push(DeltaEvent::TextDelta(content));
        }
    }

    if let Some(tool_calls) = delta.tool_calls {
        for tc in tool_calls {
            let (name, arguments) = match tc.function {
                Some(func) => (func.name, func.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            out.push(DeltaEvent::ToolCallDelta(ToolCallPayload {
                index: tc.index as usize,
                id: tc.id,
                name,
                arguments,
            }));
        }
    }

    if let Some(finish_reason) = choice.finish_reason {
        let usage = chunk.usage.map(|u| {
            openai_usage_to_canonical(u.prompt_tokens, u.completion_tokens, u.total_tokens)
        });
        out.push(DeltaEvent::Finish {
            reason: openai_finish_to_canonical(&finish_reason),
            usage,
        });
    }
    Ok(())
}
