pub mod cancel;
pub mod sse;

pub use cancel::{CancelToken, Cancellable};
pub use sse::{sse_chunk_stream, SseParser};

use crate::error::PipelineError;

/// A parsed SSE frame from the upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

/// The raw provider chunk handed to a [`crate::protocol::ChunkAdapter`].
///
/// Every supported provider streams over SSE, so a raw chunk is one SSE frame:
/// an optional event name and its data payload.
pub type RawChunk = SseEvent;

impl SseEvent {
    /// An unnamed frame carrying `data`.
    #[must_use]
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// A frame with an `event:` name.
    #[must_use]
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
            ..Self::default()
        }
    }

    /// Whether this is the `OpenAI`-style terminal `[DONE]` sentinel.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Build a chunk source from an in-memory list of frames.
///
/// Handy for replaying recorded chunks and for driving the pipeline in tests.
pub fn chunk_source<I>(
    chunks: I,
) -> impl futures_util::Stream<Item = Result<RawChunk, PipelineError>> + Send + Unpin
where
    I: IntoIterator<Item = RawChunk>,
    I::IntoIter: Send,
{
    futures_util::stream::iter(chunks.into_iter().map(Ok))
}
