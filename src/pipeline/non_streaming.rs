use serde::Serialize;

use crate::error::PipelineError;
use crate::protocol::canonical::{FinishReason, Usage};
use crate::protocol::mapping::{openai_finish_to_canonical, openai_usage_to_canonical};
use crate::protocol::openai_chat::OpenAiChatResponse;
use crate::segment::{Mode, SegmentTransformer};
use crate::tags::TagPair;

/// Reasoning and answer text split out of a complete response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SegmentedText {
    pub reasoning: String,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Split a complete text into reasoning and answer with the same transformer
/// the streaming path uses, so both agree on every edge case.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidTags`] for an empty tag.
pub fn segment_text(tags: &TagPair, text: &str) -> Result<SegmentedText, PipelineError> {
    let mut transformer = SegmentTransformer::new(tags.clone())?;
    let mut segments = Vec::new();
    transformer.push(text, &mut segments);
    transformer.flush(&mut segments);

    let mut out = SegmentedText::default();
    for segment in segments {
        match segment.mode {
            Mode::Reasoning => out.reasoning.push_str(&segment.text),
            Mode::Answer => out.answer.push_str(&segment.text),
        }
    }
    Ok(out)
}

/// Segment the first choice of a non-streaming chat completion.
///
/// Provider-native reasoning (`reasoning_content` / `reasoning`) comes first,
/// followed by any reasoning found inline in `content`.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedChunk`] when the response has no choices
/// and [`PipelineError::InvalidTags`] for an empty tag.
pub fn segment_completion_response(
    response: &OpenAiChatResponse,
    tags: &TagPair,
) -> Result<SegmentedText, PipelineError> {
    let choice = response.choices.first().ok_or_else(|| {
        PipelineError::MalformedChunk("completion response has no choices".to_string())
    })?;
    let message = &choice.message;

    let mut out = segment_text(tags, message.content.as_deref().unwrap_or_default())?;
    if let Some(native) = message
        .reasoning_content
        .as_deref()
        .or(message.reasoning.as_deref())
        .filter(|r| !r.is_empty())
    {
        out.reasoning.insert_str(0, native);
    }
    out.finish_reason = choice
        .finish_reason
        .as_deref()
        .map(openai_finish_to_canonical);
    out.usage = response.usage.as_ref().map(|u| {
        openai_usage_to_canonical(u.prompt_tokens, u.completion_tokens, u.total_tokens)
    });
    Ok(out)
}
