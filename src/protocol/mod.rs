pub mod anthropic;
pub mod canonical;
pub mod gemini;
pub mod mapping;
pub mod openai_chat;
pub mod text;

use crate::error::PipelineError;
use crate::stream::RawChunk;

use self::canonical::{DeltaEvent, ProviderKind};

/// Converts provider-specific raw chunks into canonical [`DeltaEvent`]s.
///
/// One adapter instance serves one request. Within a single chunk the
/// emitted order is reasoning, content, tool calls, finish. Once a
/// [`DeltaEvent::Finish`] has been emitted the adapter emits nothing further.
pub trait ChunkAdapter: Send {
    /// Decode `chunk`, appending zero or more deltas to `out`.
    ///
    /// # Errors
    ///
    /// Returns an adapter-level [`PipelineError`] for malformed or
    /// provider-reported error chunks.
    fn adapt(&mut self, chunk: &RawChunk, out: &mut Vec<DeltaEvent>) -> Result<(), PipelineError>;
}

impl<A: ChunkAdapter + ?Sized> ChunkAdapter for Box<A> {
    fn adapt(&mut self, chunk: &RawChunk, out: &mut Vec<DeltaEvent>) -> Result<(), PipelineError> {
        (**self).adapt(chunk, out)
    }
}

/// Build a fresh adapter for a provider dialect.
#[must_use]
pub fn adapter_for(kind: ProviderKind) -> Box<dyn ChunkAdapter> {
    match kind {
        ProviderKind::OpenAi => Box::new(openai_chat::OpenAiChunkAdapter::new()),
        ProviderKind::Anthropic => Box::new(anthropic::AnthropicChunkAdapter::new()),
        ProviderKind::Gemini => Box::new(gemini::GeminiChunkAdapter::new()),
        ProviderKind::Text => Box::new(text::TextChunkAdapter::new()),
    }
}
