use super::canonical::{FinishReason, Usage};

// ---------------------------------------------------------------------------
// Finish reason mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn openai_finish_to_canonical(s: &str) -> FinishReason {
    match s {
        "stop" => FinishReason::Stop,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

#[must_use]
pub fn anthropic_stop_to_canonical(s: &str) -> FinishReason {
    match s {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "tool_use" => FinishReason::ToolCalls,
        "max_tokens" => FinishReason::Length,
        "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

#[must_use]
pub fn gemini_finish_to_canonical(s: &str) -> FinishReason {
    match s {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
            FinishReason::ContentFilter
        }
        _ => FinishReason::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Usage mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn openai_usage_to_canonical(prompt: u64, completion: u64, total: Option<u64>) -> Usage {
    Usage {
        input_tokens: Some(prompt),
        output_tokens: Some(completion),
        total_tokens: total,
    }
    .with_computed_total()
}

#[must_use]
pub fn anthropic_usage_to_canonical(input: u64, output: u64) -> Usage {
    Usage {
        input_tokens: Some(input),
        output_tokens: Some(output),
        total_tokens: Some(input + output),
    }
}

#[must_use]
pub fn gemini_usage_to_canonical(
    prompt: Option<u64>,
    candidates: Option<u64>,
    total: Option<u64>,
) -> Usage {
    Usage {
        input_tokens: prompt,
        output_tokens: candidates,
        total_tokens: total,
    }
    .with_computed_total()
}
