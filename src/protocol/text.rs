use crate::error::PipelineError;
use crate::protocol::canonical::{DeltaEvent, FinishReason};
use crate::protocol::ChunkAdapter;
use crate::stream::RawChunk;

const FINISH_EVENT: &str = "finish";

/// Adapter for sources whose chunks are already plain text increments, such as
/// a collaborator replaying an accumulated response string.
#[derive(Debug, Default)]
pub struct TextChunkAdapter {
    finished: bool,
}

impl TextChunkAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkAdapter for TextChunkAdapter {
    fn adapt(&mut self, chunk: &RawChunk, out: &mut Vec<DeltaEvent>) -> Result<(), PipelineError> {
        if self.finished {
            return Ok(());
        }
        if chunk.is_done() || chunk.event.as_deref() == Some(FINISH_EVENT) {
            self.finished = true;
            out.push(DeltaEvent::Finish {
                reason: FinishReason::Stop,
                usage: None,
            });
            return Ok(());
        }
        if !chunk.data.is_empty() {
            out.push(DeltaEvent::TextDelta(chunk.data.clone()));
        }
        Ok(())
    }
}
