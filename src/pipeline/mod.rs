//! Drives one completion stream from raw chunks to lifecycle events.
//!
//! ```text
//! raw chunks -> Cancellable -> ChunkAdapter -> DeltaEvent
//!     ReasoningDelta ------------------------> reasoning segment --+
//!     TextDelta -----> SegmentTransformer ---> segments -----------+-> LifecycleEvent -> sink
//!     ToolCallDelta -------------------------------------------------> tool-call-delta
//!     Finish --------> flush + completion events
//! ```

pub mod events;
pub mod non_streaming;

pub use events::{EventSink, LifecycleEvent, PipelineOutcome, ResponseSummary};
pub use non_streaming::{segment_completion_response, segment_text, SegmentedText};

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::observability::{log_request_complete, millis, ResponseTimings};
use crate::protocol::canonical::{DeltaEvent, FinishReason, ToolCallPayload, Usage};
use crate::protocol::ChunkAdapter;
use crate::segment::{Mode, Segment, SegmentTransformer};
use crate::state::CancellationRegistry;
use crate::stream::{CancelToken, Cancellable, RawChunk};
use crate::tags::{TagDictionary, TagPair};

use self::events::merge_tool_call;

/// Identifies the response a pipeline run produces.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub message_id: String,
    pub model: String,
    /// Overrides the dictionary lookup for this request.
    pub tags: Option<TagPair>,
}

impl PipelineRequest {
    #[must_use]
    pub fn new(message_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            model: model.into(),
            tags: None,
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: TagPair) -> Self {
        self.tags = Some(tags);
        self
    }
}

/// Per-request state: cancellation handle, timing and accumulated output.
pub struct RequestContext {
    pub message_id: String,
    pub model: String,
    pub cancel: CancelToken,
    started_at: Instant,
    first_token_at: Option<Instant>,
    thinking_elapsed: Option<Duration>,
    accumulated_text: String,
    accumulated_thinking: String,
    tool_calls: Vec<ToolCallPayload>,
}

impl RequestContext {
    fn new(request: &PipelineRequest, cancel: CancelToken) -> Self {
        Self {
            message_id: request.message_id.clone(),
            model: request.model.clone(),
            cancel,
            started_at: Instant::now(),
            first_token_at: None,
            thinking_elapsed: None,
            accumulated_text: String::new(),
            accumulated_thinking: String::new(),
            tool_calls: Vec::new(),
        }
    }

    #[must_use]
    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    #[must_use]
    pub fn accumulated_thinking(&self) -> &str {
        &self.accumulated_thinking
    }

    fn thinking_completed(&self) -> bool {
        self.thinking_elapsed.is_some()
    }

    fn forward_segment<K: EventSink>(&mut self, segment: Segment, sink: &mut K) {
        let now = Instant::now();
        let first_token_at = *self.first_token_at.get_or_insert(now);
        match segment.mode {
            Mode::Reasoning => {
                self.accumulated_thinking.push_str(&segment.text);
                sink.emit(LifecycleEvent::ThinkingDelta {
                    text: segment.text,
                    elapsed_ms: millis(now - first_token_at),
                });
            }
            Mode::Answer => {
                if !self.accumulated_thinking.is_empty() && !self.thinking_completed() {
                    self.complete_thinking(now, sink);
                }
                self.accumulated_text.push_str(&segment.text);
                sink.emit(LifecycleEvent::TextDelta { text: segment.text });
            }
        }
    }

    fn complete_thinking<K: EventSink>(&mut self, now: Instant, sink: &mut K) {
        let elapsed = self
            .first_token_at
            .map_or(Duration::ZERO, |first| now - first);
        self.thinking_elapsed = Some(elapsed);
        sink.emit(LifecycleEvent::ThinkingComplete {
            text: self.accumulated_thinking.clone(),
            elapsed_ms: millis(elapsed),
        });
    }

    fn forward_tool_call<K: EventSink>(&mut self, payload: ToolCallPayload, sink: &mut K) {
        merge_tool_call(&mut self.tool_calls, &payload);
        sink.emit(LifecycleEvent::ToolCallDelta { payload });
    }

    fn into_summary(self, finish_reason: FinishReason, usage: Option<Usage>) -> ResponseSummary {
        let first_token_ms = self
            .first_token_at
            .map(|first| millis(first - self.started_at));
        ResponseSummary {
            message_id: self.message_id,
            model: self.model,
            text: self.accumulated_text,
            thinking: (!self.accumulated_thinking.is_empty()).then_some(self.accumulated_thinking),
            finish_reason,
            usage,
            tool_calls: self.tool_calls,
            first_token_ms,
            thinking_ms: self.thinking_elapsed.map(millis),
        }
    }
}

// ---------------------------------------------------------------------------
// ResponseEventPipeline
// ---------------------------------------------------------------------------

/// Turns a provider chunk stream into ordered [`LifecycleEvent`]s.
///
/// Independent runs share only the injected [`CancellationRegistry`]; all
/// segmentation state lives inside a single `run` call.
#[derive(Clone)]
pub struct ResponseEventPipeline {
    registry: Arc<CancellationRegistry>,
    tags: Arc<TagDictionary>,
}

impl ResponseEventPipeline {
    #[must_use]
    pub fn new(registry: Arc<CancellationRegistry>, tags: Arc<TagDictionary>) -> Self {
        Self { registry, tags }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn tag_dictionary(&self) -> &TagDictionary {
        &self.tags
    }

    /// Run one request to completion, failure or cancellation.
    ///
    /// The request is registered under its message id for the duration of
    /// the call and released on every exit path. A new chunk is pulled only
    /// after every event of the previous chunk has reached `sink`.
    pub async fn run<S, A, K>(
        &self,
        request: PipelineRequest,
        source: S,
        mut adapter: A,
        sink: &mut K,
    ) -> PipelineOutcome
    where
        S: Stream<Item = Result<RawChunk, PipelineError>>,
        A: ChunkAdapter,
        K: EventSink,
    {
        let token = CancelToken::new();
        let _registration = self
            .registry
            .register_scoped(&request.message_id, token.clone());
        let mut ctx = RequestContext::new(&request, token.clone());

        sink.emit(LifecycleEvent::ResponseCreated {
            message_id: request.message_id.clone(),
            model: request.model.clone(),
        });

        let tags = request
            .tags
            .clone()
            .unwrap_or_else(|| self.tags.lookup(&request.model).clone());
        let mut transformer = match SegmentTransformer::new(tags) {
            Ok(transformer) => transformer,
            Err(err) => return fail(&ctx, err, sink),
        };

        let source = Cancellable::new(source, token);
        let mut source = std::pin::pin!(source);
        let mut deltas: Vec<DeltaEvent> = Vec::with_capacity(4);
        let mut segments: Vec<Segment> = Vec::with_capacity(4);

        loop {
            let chunk = match source.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(err)) if err.is_aborted() => return abort(&ctx),
                Some(Err(err)) => return fail(&ctx, err, sink),
                None => {
                    debug!(
                        message_id = %ctx.message_id,
                        "source ended without finish"
                    );
                    return finish(ctx, &mut transformer, FinishReason::Unknown, None, sink);
                }
            };
            if ctx.cancel.is_cancelled() {
                return abort(&ctx);
            }

            deltas.clear();
            if let Err(err) = adapter.adapt(&chunk, &mut deltas) {
                return fail(&ctx, err, sink);
            }

            for delta in deltas.drain(..) {
                match delta {
                    DeltaEvent::ReasoningDelta(text) => {
                        if !text.is_empty() {
                            ctx.forward_segment(Segment::reasoning(text), sink);
                        }
                    }
                    DeltaEvent::TextDelta(text) => {
                        transformer.push(&text, &mut segments);
                        for segment in segments.drain(..) {
                            ctx.forward_segment(segment, sink);
                        }
                    }
                    DeltaEvent::ToolCallDelta(payload) => ctx.forward_tool_call(payload, sink),
                    DeltaEvent::Finish { reason, usage } => {
                        return finish(ctx, &mut transformer, reason, usage, sink);
                    }
                }
            }
        }
    }
}

fn finish<K: EventSink>(
    mut ctx: RequestContext,
    transformer: &mut SegmentTransformer,
    reason: FinishReason,
    usage: Option<Usage>,
    sink: &mut K,
) -> PipelineOutcome {
    let mut rest = Vec::new();
    transformer.flush(&mut rest);
    for segment in rest {
        ctx.forward_segment(segment, sink);
    }

    if !ctx.accumulated_thinking.is_empty() && !ctx.thinking_completed() {
        ctx.complete_thinking(Instant::now(), sink);
    }
    if !ctx.accumulated_text.is_empty() {
        sink.emit(LifecycleEvent::TextComplete {
            text: ctx.accumulated_text.clone(),
        });
    }

    let timings = ResponseTimings {
        total: ctx.started_at.elapsed(),
        first_token: ctx.first_token_at.map(|first| first - ctx.started_at),
        thinking: ctx.thinking_elapsed,
    };
    log_request_complete(&ctx.model, reason, usage.as_ref(), timings);

    let summary = ctx.into_summary(reason, usage);
    sink.emit(LifecycleEvent::BlockComplete {
        response: Some(summary.clone()),
    });
    PipelineOutcome::Completed(summary)
}

fn fail<K: EventSink>(ctx: &RequestContext, err: PipelineError, sink: &mut K) -> PipelineOutcome {
    warn!(
        message_id = %ctx.message_id,
        model = %ctx.model,
        category = err.category().as_str(),
        error = %err,
        "pipeline failed"
    );
    sink.emit(LifecycleEvent::Error { error: err.clone() });
    PipelineOutcome::Failed(err)
}

fn abort(ctx: &RequestContext) -> PipelineOutcome {
    info!(
        message_id = %ctx.message_id,
        model = %ctx.model,
        text_len = ctx.accumulated_text.len(),
        thinking_len = ctx.accumulated_thinking.len(),
        "pipeline cancelled"
    );
    PipelineOutcome::Aborted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::text::TextChunkAdapter;
    use crate::stream::chunk_source;

    fn pipeline() -> ResponseEventPipeline {
        ResponseEventPipeline::new(
            Arc::new(CancellationRegistry::new(4)),
            Arc::new(TagDictionary::builtin()),
        )
    }

    fn text_chunks(parts: &[&str]) -> Vec<RawChunk> {
        parts.iter().map(|part| RawChunk::data(*part)).collect()
    }

    #[tokio::test]
    async fn missing_finish_still_completes() {
        let pipeline = pipeline();
        let mut events = Vec::new();
        let outcome = pipeline
            .run(
                PipelineRequest::new("msg_1", "qwq-32b"),
                chunk_source(text_chunks(&["<think>a</think>", "b<thi"])),
                TextChunkAdapter::new(),
                &mut |event: LifecycleEvent| events.push(event),
            )
            .await;

        let summary = outcome.summary().unwrap();
        assert_eq!(summary.finish_reason, FinishReason::Unknown);
        assert_eq!(summary.text, "b<thi");
        assert_eq!(summary.thinking.as_deref(), Some("a"));
        assert!(matches!(
            events.last(),
            Some(LifecycleEvent::BlockComplete { response: Some(_) })
        ));
        assert!(pipeline.registry().is_empty());
    }

    #[tokio::test]
    async fn request_tags_override_dictionary() {
        let pipeline = pipeline();
        let mut events = Vec::new();
        let outcome = pipeline
            .run(
                PipelineRequest::new("msg_1", "kimi-k2")
                    .with_tags(TagPair::new("[r]", "[/r]", "\n")),
                chunk_source(text_chunks(&["[r]x[/r]y", "[DONE]"])),
                TextChunkAdapter::new(),
                &mut |event: LifecycleEvent| events.push(event),
            )
            .await;
        let summary = outcome.summary().unwrap();
        assert_eq!(summary.thinking.as_deref(), Some("x"));
        assert_eq!(summary.text, "y");
    }

    #[tokio::test]
    async fn invalid_tags_fail_after_created() {
        let pipeline = pipeline();
        let mut kinds = Vec::new();
        let outcome = pipeline
            .run(
                PipelineRequest::new("msg_1", "m").with_tags(TagPair::new("", "</x>", "\n")),
                chunk_source(text_chunks(&["hi"])),
                TextChunkAdapter::new(),
                &mut |event: LifecycleEvent| kinds.push(event.kind()),
            )
            .await;
        assert!(matches!(
            outcome,
            PipelineOutcome::Failed(PipelineError::InvalidTags(_))
        ));
        assert_eq!(kinds, vec!["response-created", "error"]);
        assert!(pipeline.registry().is_empty());
    }
}
