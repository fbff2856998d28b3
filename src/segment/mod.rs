//! Streaming segmentation of tag-delimited reasoning out of plain content.
//!
//! Models that inline their chain of thought wrap it in a [`TagPair`]
//! (`<think>...</think>` and friends). The tags can arrive split across any
//! number of deltas, so the transformer keeps only the trailing bytes that
//! could still grow into a tag and emits everything else as soon as it is
//! safe to classify.

use serde::Serialize;
use smallvec::SmallVec;

use crate::error::PipelineError;
use crate::tags::{find_potential_start, TagPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Reasoning,
    Answer,
}

/// A classified run of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub mode: Mode,
    pub text: String,
}

impl Segment {
    #[must_use]
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            mode: Mode::Reasoning,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            mode: Mode::Answer,
            text: text.into(),
        }
    }
}

/// Mutable state of one segmentation run. Owned by a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentationState {
    /// Trailing text that may still turn out to be (part of) a tag.
    pub buffer: String,
    pub is_reasoning: bool,
    /// Whether a reasoning segment has been emitted yet.
    pub reasoning_emitted: bool,
    /// Whether an answer segment has been emitted yet.
    pub text_emitted: bool,
    /// Set by every tag switch, cleared by the next emitted segment.
    pub after_switch: bool,
}

impl SegmentationState {
    #[must_use]
    pub fn mode(&self) -> Mode {
        if self.is_reasoning {
            Mode::Reasoning
        } else {
            Mode::Answer
        }
    }
}

pub type Segments = SmallVec<[Segment; 4]>;

// ---------------------------------------------------------------------------
// Pure form
// ---------------------------------------------------------------------------

/// Feed one text delta through `state`, returning the next state and the
/// segments that became classifiable.
#[must_use]
pub fn transform(
    mut state: SegmentationState,
    tags: &TagPair,
    delta: &str,
) -> (SegmentationState, Segments) {
    let mut out = Segments::new();
    state.buffer.push_str(delta);
    drain_buffer(&mut state, tags, &mut out);
    (state, out)
}

/// Emit whatever is left in the buffer as a segment of the current mode,
/// including an unresolved partial tag.
#[must_use]
pub fn flush(mut state: SegmentationState, tags: &TagPair) -> (SegmentationState, Segments) {
    let mut out = Segments::new();
    let rest = std::mem::take(&mut state.buffer);
    publish(&mut state, tags, rest, &mut out);
    (state, out)
}

fn drain_buffer<E: Extend<Segment>>(state: &mut SegmentationState, tags: &TagPair, out: &mut E) {
    loop {
        let next_tag = if state.is_reasoning {
            tags.closing_tag.as_str()
        } else {
            tags.opening_tag.as_str()
        };

        let Some(start) = find_potential_start(&state.buffer, next_tag) else {
            let text = std::mem::take(&mut state.buffer);
            publish(state, tags, text, out);
            return;
        };

        let complete = state.buffer[start..].starts_with(next_tag);
        let head: String = state.buffer.drain(..start).collect();
        publish(state, tags, head, out);

        if !complete {
            // Partial tag stays buffered until more input decides it.
            return;
        }
        state.buffer.replace_range(..next_tag.len(), "");
        state.is_reasoning = !state.is_reasoning;
        state.after_switch = true;
    }
}

fn publish<E: Extend<Segment>>(
    state: &mut SegmentationState,
    tags: &TagPair,
    text: String,
    out: &mut E,
) {
    if text.is_empty() {
        return;
    }
    let mode = state.mode();
    let emitted_before = match mode {
        Mode::Reasoning => std::mem::replace(&mut state.reasoning_emitted, true),
        Mode::Answer => std::mem::replace(&mut state.text_emitted, true),
    };
    let text = if std::mem::take(&mut state.after_switch) && emitted_before {
        let mut prefixed = String::with_capacity(tags.separator.len() + text.len());
        prefixed.push_str(&tags.separator);
        prefixed.push_str(&text);
        prefixed
    } else {
        text
    };
    out.extend(std::iter::once(Segment { mode, text }));
}

// ---------------------------------------------------------------------------
// SegmentTransformer
// ---------------------------------------------------------------------------

/// Owning wrapper around [`SegmentationState`] for one in-flight response.
#[derive(Debug, Clone)]
pub struct SegmentTransformer {
    tags: TagPair,
    state: SegmentationState,
}

impl SegmentTransformer {
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidTags`] when either tag is empty; an
    /// empty tag would match everywhere and never make progress.
    pub fn new(tags: TagPair) -> Result<Self, PipelineError> {
        if tags.opening_tag.is_empty() || tags.closing_tag.is_empty() {
            return Err(PipelineError::InvalidTags(format!(
                "opening tag {:?} and closing tag {:?} must both be non-empty",
                tags.opening_tag, tags.closing_tag
            )));
        }
        Ok(Self {
            tags,
            state: SegmentationState::default(),
        })
    }

    /// Append a text delta and push newly classified segments into `out`.
    pub fn push(&mut self, delta: &str, out: &mut Vec<Segment>) {
        self.state.buffer.push_str(delta);
        drain_buffer(&mut self.state, &self.tags, out);
    }

    /// Emit the remaining buffer. Called once the source has finished.
    pub fn flush(&mut self, out: &mut Vec<Segment>) {
        let rest = std::mem::take(&mut self.state.buffer);
        publish(&mut self.state, &self.tags, rest, out);
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    #[must_use]
    pub fn state(&self) -> &SegmentationState {
        &self.state
    }

    #[must_use]
    pub fn tags(&self) -> &TagPair {
        &self.tags
    }
}
