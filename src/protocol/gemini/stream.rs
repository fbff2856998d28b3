use crate::error::PipelineError;
use crate::protocol::canonical::{DeltaEvent, FinishReason, ToolCallPayload};
use crate::protocol::mapping::{gemini_finish_to_canonical, gemini_usage_to_canonical};
use crate::protocol::ChunkAdapter;
use crate::stream::RawChunk;

use super::GeminiResponse;

/// Adapter for Gemini `streamGenerateContent?alt=sse` streams.
#[derive(Debug, Default)]
pub struct GeminiChunkAdapter {
    tool_calls_seen: usize,
    finished: bool,
}

impl GeminiChunkAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkAdapter for GeminiChunkAdapter {
    fn adapt(&mut self, chunk: &RawChunk, out: &mut Vec<DeltaEvent>) -> Result<(), PipelineError> {
        if self.finished || chunk.data.trim().is_empty() {
            return Ok(());
        }
        let response: GeminiResponse = serde_json::from_str(&chunk.data)
            .map_err(|e| PipelineError::malformed("gemini chunk", &e))?;
        self.decode_into(response, out)
    }
}

impl GeminiChunkAdapter {
    fn decode_into(
        &mut self,
        response: GeminiResponse,
        out: &mut Vec<DeltaEvent>,
    ) -> Result<(), PipelineError> {
        if let Some(error) = response.error {
            return Err(PipelineError::Upstream(format!(
                "{}: {}",
                error.code, error.message
            )));
        }

        let Some(candidate) = response.candidates.and_then(|c| c.into_iter().next()) else {
            return Ok(());
        };

        // Parts are split by kind so one chunk still yields reasoning first,
        // then text, then tool calls.
        let mut reasoning = String::new();
        let mut text = String::new();
        let mut calls = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(call) = part.function_call {
                let arguments = serde_json::to_string(&call.args)
                    .map_err(|e| PipelineError::malformed("gemini functionCall args", &e))?;
                calls.push(ToolCallPayload {
                    index: self.tool_calls_seen,
                    id: None,
                    name: Some(call.name),
                    arguments,
                });
                self.tool_calls_seen += 1;
            } else if let Some(part_text) = part.text {
                if part.thought {
                    reasoning.push_str(&part_text);
                } else {
                    text.push_str(&part_text);
                }
            }
        }

        if !reasoning.is_empty() {
            out.push(DeltaEvent::ReasoningDelta(reasoning));
        }
        if !text.is_empty() {
            out.push(DeltaEvent::TextDelta(text));
        }
        out.extend(calls.into_iter().map(DeltaEvent::ToolCallDelta));

        if let Some(fr) = candidate.finish_reason {
            let base = gemini_finish_to_canonical(&fr);
            let reason = if base == FinishReason::Stop && self.tool_calls_seen > 0 {
                FinishReason::ToolCalls
            } else {
                base
            };
            let usage = response.usage_metadata.map(|u| {
                gemini_usage_to_canonical(
                    u.prompt_token_count,
                    u.candidates_token_count,
                    u.total_token_count,
                )
            });
            self.finished = true;
            out.push(DeltaEvent::Finish { reason, usage });
        }
        Ok(())
    }
}
