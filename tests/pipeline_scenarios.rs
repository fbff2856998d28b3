use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use thinkstream_rs::error::PipelineError;
use thinkstream_rs::pipeline::{
    LifecycleEvent, PipelineOutcome, PipelineRequest, ResponseEventPipeline,
};
use thinkstream_rs::protocol::anthropic::AnthropicChunkAdapter;
use thinkstream_rs::protocol::canonical::FinishReason;
use thinkstream_rs::protocol::gemini::GeminiChunkAdapter;
use thinkstream_rs::protocol::openai_chat::OpenAiChunkAdapter;
use thinkstream_rs::protocol::text::TextChunkAdapter;
use thinkstream_rs::state::CancellationRegistry;
use thinkstream_rs::stream::{chunk_source, sse_chunk_stream, CancelToken, RawChunk};
use thinkstream_rs::tags::{TagDictionary, TagPair};

fn pipeline() -> ResponseEventPipeline {
    ResponseEventPipeline::new(
        Arc::new(CancellationRegistry::new(8)),
        Arc::new(TagDictionary::builtin()),
    )
}

fn openai_content(content: &str) -> RawChunk {
    RawChunk::data(
        json!({"choices":[{"index":0,"delta":{"content":content},"finish_reason":null}]})
            .to_string(),
    )
}

fn openai_finish(reason: &str) -> RawChunk {
    RawChunk::data(
        json!({
            "choices":[{"index":0,"delta":{},"finish_reason":reason}],
            "usage":{"prompt_tokens":11,"completion_tokens":22}
        })
        .to_string(),
    )
}

/// Strip timing so event sequences can be compared exactly.
fn normalized(events: &[LifecycleEvent]) -> Vec<LifecycleEvent> {
    events
        .iter()
        .cloned()
        .map(|event| match event {
            LifecycleEvent::ThinkingDelta { text, .. } => LifecycleEvent::ThinkingDelta {
                text,
                elapsed_ms: 0,
            },
            LifecycleEvent::ThinkingComplete { text, .. } => LifecycleEvent::ThinkingComplete {
                text,
                elapsed_ms: 0,
            },
            other => other,
        })
        .collect()
}

fn thinking_delta(text: &str) -> LifecycleEvent {
    LifecycleEvent::ThinkingDelta {
        text: text.to_string(),
        elapsed_ms: 0,
    }
}

fn text_delta(text: &str) -> LifecycleEvent {
    LifecycleEvent::TextDelta {
        text: text.to_string(),
    }
}

#[tokio::test]
async fn split_tags_produce_ordered_lifecycle() {
    let pipeline = pipeline();
    let mut chunks: Vec<RawChunk> = ["Hello ", "<thi", "nk>deep ", "thoughts</thi", "nk> world"]
        .into_iter()
        .map(openai_content)
        .collect();
    chunks.push(openai_finish("stop"));

    let mut events = Vec::new();
    let outcome = pipeline
        .run(
            PipelineRequest::new("msg_a", "deepseek-r1"),
            chunk_source(chunks),
            OpenAiChunkAdapter::new(),
            &mut |event: LifecycleEvent| events.push(event),
        )
        .await;

    let summary = outcome.summary().expect("completed").clone();
    let events = normalized(&events);
    assert_eq!(
        events[..7],
        [
            LifecycleEvent::ResponseCreated {
                message_id: "msg_a".into(),
                model: "deepseek-r1".into(),
            },
            text_delta("Hello "),
            thinking_delta("deep "),
            thinking_delta("thoughts"),
            LifecycleEvent::ThinkingComplete {
                text: "deep thoughts".into(),
                elapsed_ms: 0,
            },
            // The answer resumes after a switch, so it carries the separator.
            text_delta("\n world"),
            LifecycleEvent::TextComplete {
                text: "Hello \n world".into(),
            },
        ]
    );
    assert_eq!(events.len(), 8);
    assert!(matches!(
        &events[7],
        LifecycleEvent::BlockComplete { response: Some(r) } if r.text == "Hello \n world"
    ));

    assert_eq!(summary.thinking.as_deref(), Some("deep thoughts"));
    assert_eq!(summary.finish_reason, FinishReason::Stop);
    assert_eq!(summary.usage.and_then(|u| u.total_tokens), Some(33));
    assert!(summary.first_token_ms.is_some());
    assert!(summary.thinking_ms.is_some());
}

#[tokio::test]
async fn unresolved_partial_tag_is_flushed_on_finish() {
    let pipeline = pipeline();
    let mut events = Vec::new();
    pipeline
        .run(
            PipelineRequest::new("msg_b", "qwen3"),
            chunk_source(vec![openai_content("<thi"), openai_finish("length")]),
            OpenAiChunkAdapter::new(),
            &mut |event: LifecycleEvent| events.push(event),
        )
        .await;

    let kinds: Vec<_> = events.iter().map(LifecycleEvent::kind).collect();
    assert_eq!(
        kinds,
        vec!["response-created", "text-delta", "text-complete", "block-complete"]
    );
    assert_eq!(events[1], text_delta("<thi"));
}

#[tokio::test]
async fn cancel_after_first_chunk_skips_block_complete() {
    let registry = Arc::new(CancellationRegistry::new(8));
    let pipeline = ResponseEventPipeline::new(
        Arc::clone(&registry),
        Arc::new(TagDictionary::builtin()),
    );

    let chunks = vec![
        RawChunk::data("<think>step one"),
        RawChunk::data(" step two</think>answer"),
        RawChunk::data("[DONE]"),
    ];
    let canceller = Arc::clone(&registry);
    let mut events = Vec::new();
    let outcome = pipeline
        .run(
            PipelineRequest::new("msg_c", "qwq"),
            chunk_source(chunks),
            TextChunkAdapter::new(),
            &mut |event: LifecycleEvent| {
                if matches!(event, LifecycleEvent::ThinkingDelta { .. }) {
                    assert!(canceller.cancel("msg_c"));
                }
                events.push(event);
            },
        )
        .await;

    assert_eq!(outcome, PipelineOutcome::Aborted);
    let kinds: Vec<_> = events.iter().map(LifecycleEvent::kind).collect();
    assert_eq!(kinds, vec!["response-created", "thinking-delta"]);
    assert!(!registry.is_registered("msg_c"));
    assert_eq!(registry.released_count(), 1);
}

#[tokio::test]
async fn cancel_interrupts_a_stalled_source() {
    let pipeline = pipeline();
    let registry = Arc::clone(pipeline.registry());
    let source = chunk_source(vec![RawChunk::data("partial answer")])
        .chain(futures_util::stream::pending());

    let canceller = tokio::spawn(async move {
        while !registry.is_registered("msg_stall") {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.cancel("msg_stall")
    });

    let mut events = Vec::new();
    let outcome = pipeline
        .run(
            PipelineRequest::new("msg_stall", "m"),
            source,
            TextChunkAdapter::new(),
            &mut |event: LifecycleEvent| events.push(event),
        )
        .await;

    assert!(canceller.await.unwrap());
    assert_eq!(outcome, PipelineOutcome::Aborted);
    assert_eq!(events.last(), Some(&text_delta("partial answer")));
    assert!(pipeline.registry().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_are_isolated() {
    let pipeline = pipeline();
    let mut handles = Vec::new();
    for i in 0..16 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("msg_{i}");
            let reasoning = format!("reason {i}");
            let answer = format!("answer {i}");
            let text = format!("<think>{reasoning}</think>{answer}");
            // Split each request differently so buffered partial tags differ.
            let chunks: Vec<RawChunk> = text
                .as_bytes()
                .chunks(i % 5 + 1)
                .map(|piece| RawChunk::data(String::from_utf8_lossy(piece).into_owned()))
                .chain(std::iter::once(RawChunk::data("[DONE]")))
                .collect();

            let cancel_me = i % 4 == 0;
            let registry = Arc::clone(pipeline.registry());
            let cancel_id = id.clone();
            let mut events = Vec::new();
            let outcome = pipeline
                .run(
                    PipelineRequest::new(id, "qwq"),
                    chunk_source(chunks),
                    TextChunkAdapter::new(),
                    &mut |event: LifecycleEvent| {
                        if cancel_me && matches!(event, LifecycleEvent::ResponseCreated { .. }) {
                            registry.cancel(&cancel_id);
                        }
                        events.push(event);
                    },
                )
                .await;
            (cancel_me, reasoning, answer, outcome)
        }));
    }

    for handle in handles {
        let (cancelled, reasoning, answer, outcome) = handle.await.unwrap();
        if cancelled {
            assert_eq!(outcome, PipelineOutcome::Aborted);
        } else {
            let summary = outcome.summary().expect("uncancelled request completes");
            assert_eq!(summary.thinking.as_deref(), Some(reasoning.as_str()));
            assert_eq!(summary.text, answer);
        }
    }
    assert!(pipeline.registry().is_empty());
    assert_eq!(pipeline.registry().released_count(), 16);
}

#[tokio::test]
async fn malformed_chunk_fails_only_that_request() {
    let pipeline = pipeline();
    let mut events = Vec::new();
    let outcome = pipeline
        .run(
            PipelineRequest::new("msg_bad", "m"),
            chunk_source(vec![openai_content("ok"), RawChunk::data("{not json")]),
            OpenAiChunkAdapter::new(),
            &mut |event: LifecycleEvent| events.push(event),
        )
        .await;

    assert!(matches!(
        outcome,
        PipelineOutcome::Failed(PipelineError::MalformedChunk(_))
    ));
    assert!(matches!(events.last(), Some(LifecycleEvent::Error { .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, LifecycleEvent::BlockComplete { .. })));

    // The pipeline itself is unaffected.
    let outcome = pipeline
        .run(
            PipelineRequest::new("msg_good", "m"),
            chunk_source(vec![openai_content("fine"), openai_finish("stop")]),
            OpenAiChunkAdapter::new(),
            &mut |_event: LifecycleEvent| {},
        )
        .await;
    assert!(outcome.is_completed());
}

#[tokio::test]
async fn upstream_error_chunk_becomes_error_event() {
    let pipeline = pipeline();
    let mut events = Vec::new();
    let error_chunk = RawChunk::data(
        json!({"error":{"message":"model overloaded","type":"server_error"}}).to_string(),
    );
    let outcome = pipeline
        .run(
            PipelineRequest::new("msg_err", "m"),
            chunk_source(vec![error_chunk]),
            OpenAiChunkAdapter::new(),
            &mut |event: LifecycleEvent| events.push(event),
        )
        .await;
    assert_eq!(
        outcome,
        PipelineOutcome::Failed(PipelineError::Upstream("model overloaded".into()))
    );
    assert_eq!(
        events.last(),
        Some(&LifecycleEvent::Error {
            error: PipelineError::Upstream("model overloaded".into())
        })
    );
}

#[tokio::test]
async fn source_error_is_reported() {
    let pipeline = pipeline();
    let bodies: Vec<Result<bytes::Bytes, std::io::Error>> = vec![
        Ok(bytes::Bytes::from(format!(
            "data: {}\n\n",
            json!({"choices":[{"index":0,"delta":{"content":"hi"}}]})
        ))),
        Err(std::io::Error::other("connection reset")),
    ];
    let mut events = Vec::new();
    let outcome = pipeline
        .run(
            PipelineRequest::new("msg_src", "m"),
            sse_chunk_stream(futures_util::stream::iter(bodies)),
            OpenAiChunkAdapter::new(),
            &mut |event: LifecycleEvent| events.push(event),
        )
        .await;
    assert_eq!(
        outcome,
        PipelineOutcome::Failed(PipelineError::Source("connection reset".into()))
    );
    assert_eq!(events[1], text_delta("hi"));
}

#[tokio::test]
async fn provider_reasoning_bypasses_tag_parsing() {
    let pipeline = pipeline();
    let chunks = vec![
        RawChunk::data(
            json!({"choices":[{"index":0,"delta":{"reasoning_content":"why <think> here"}}]})
                .to_string(),
        ),
        openai_content("because"),
        openai_finish("stop"),
    ];
    let mut events = Vec::new();
    let outcome = pipeline
        .run(
            PipelineRequest::new("msg_native", "deepseek-reasoner"),
            chunk_source(chunks),
            OpenAiChunkAdapter::new(),
            &mut |event: LifecycleEvent| events.push(event),
        )
        .await;
    let summary = outcome.summary().unwrap();
    assert_eq!(summary.thinking.as_deref(), Some("why <think> here"));
    assert_eq!(summary.text, "because");
    let completes = events
        .iter()
        .filter(|e| matches!(e, LifecycleEvent::ThinkingComplete { .. }))
        .count();
    assert_eq!(completes, 1);
}

#[tokio::test]
async fn tool_calls_are_forwarded_and_collected() {
    let pipeline = pipeline();
    let chunks = vec![
        RawChunk::data(
            json!({"choices":[{"index":0,"delta":{"tool_calls":[
                {"index":0,"id":"call_1","type":"function","function":{"name":"search","arguments":"{\"q\":"}}
            ]}}]})
            .to_string(),
        ),
        RawChunk::data(
            json!({"choices":[{"index":0,"delta":{"tool_calls":[
                {"index":0,"function":{"arguments":"\"rust\"}"}}
            ]}}]})
            .to_string(),
        ),
        openai_finish("tool_calls"),
    ];
    let mut events = Vec::new();
    let outcome = pipeline
        .run(
            PipelineRequest::new("msg_tools", "gpt-4o"),
            chunk_source(chunks),
            OpenAiChunkAdapter::new(),
            &mut |event: LifecycleEvent| events.push(event),
        )
        .await;

    let summary = outcome.summary().unwrap();
    assert_eq!(summary.finish_reason, FinishReason::ToolCalls);
    assert_eq!(summary.tool_calls.len(), 1);
    assert_eq!(summary.tool_calls[0].arguments, "{\"q\":\"rust\"}");
    let deltas = events
        .iter()
        .filter(|e| matches!(e, LifecycleEvent::ToolCallDelta { .. }))
        .count();
    assert_eq!(deltas, 2);
    assert!(!events
        .iter()
        .any(|e| matches!(e, LifecycleEvent::TextComplete { .. })));
}

#[tokio::test]
async fn anthropic_stream_end_to_end() {
    let pipeline = pipeline();
    let body = [
        json!({"type":"message_start","message":{"id":"m1","model":"claude","usage":{"input_tokens":9,"output_tokens":1}}}),
        json!({"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":""}}),
        json!({"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"Let me think."}}),
        json!({"type":"content_block_stop","index":0}),
        json!({"type":"content_block_start","index":1,"content_block":{"type":"text","text":""}}),
        json!({"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"Paris."}}),
        json!({"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":12}}),
        json!({"type":"message_stop"}),
    ]
    .iter()
    .map(|v| format!("event: {}\ndata: {v}\n\n", v["type"].as_str().unwrap()))
    .collect::<String>();

    let pieces: Vec<Result<bytes::Bytes, std::io::Error>> = body
        .as_bytes()
        .chunks(17)
        .map(|c| Ok(bytes::Bytes::copy_from_slice(c)))
        .collect();

    let outcome = pipeline
        .run(
            PipelineRequest::new("msg_claude", "claude-sonnet"),
            sse_chunk_stream(futures_util::stream::iter(pieces)),
            AnthropicChunkAdapter::new(),
            &mut |_event: LifecycleEvent| {},
        )
        .await;
    let summary = outcome.summary().unwrap();
    assert_eq!(summary.thinking.as_deref(), Some("Let me think."));
    assert_eq!(summary.text, "Paris.");
    assert_eq!(summary.finish_reason, FinishReason::Stop);
    assert_eq!(summary.usage.as_ref().and_then(|u| u.total_tokens), Some(21));
}

#[tokio::test]
async fn gemini_stream_end_to_end() {
    let pipeline = pipeline();
    let chunks = vec![
        RawChunk::data(
            json!({"candidates":[{"content":{"role":"model","parts":[
                {"text":"considering","thought":true}
            ]}}]})
            .to_string(),
        ),
        RawChunk::data(
            json!({"candidates":[{"content":{"role":"model","parts":[{"text":"42"}]},"finishReason":"STOP"}],
                   "usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":6}})
            .to_string(),
        ),
    ];
    let outcome = pipeline
        .run(
            PipelineRequest::new("msg_gemini", "gemini-2.5-pro"),
            chunk_source(chunks),
            GeminiChunkAdapter::new(),
            &mut |_event: LifecycleEvent| {},
        )
        .await;
    let summary = outcome.summary().unwrap();
    assert_eq!(summary.thinking.as_deref(), Some("considering"));
    assert_eq!(summary.text, "42");
    assert_eq!(summary.usage.as_ref().and_then(|u| u.total_tokens), Some(10));
}

#[tokio::test]
async fn kimi_dialect_is_selected_by_model() {
    let pipeline = pipeline();
    let outcome = pipeline
        .run(
            PipelineRequest::new("msg_kimi", "moonshotai/Kimi-K2-Thinking"),
            chunk_source(vec![
                RawChunk::data("◁thi"),
                RawChunk::data("nk▷推理◁/think▷"),
                RawChunk::data("答案"),
                RawChunk::data("[DONE]"),
            ]),
            TextChunkAdapter::new(),
            &mut |_event: LifecycleEvent| {},
        )
        .await;
    let summary = outcome.summary().unwrap();
    assert_eq!(summary.thinking.as_deref(), Some("推理"));
    assert_eq!(summary.text, "答案");
}

#[test]
fn duplicate_registration_replaces_without_cleanup() {
    let registry = Arc::new(CancellationRegistry::new(4));
    let first = CancelToken::new();
    let second = CancelToken::new();

    let first_guard = registry.register_scoped("msg_dup", first.clone());
    let second_guard = registry.register_scoped("msg_dup", second.clone());
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.released_count(), 0);

    // The replaced owner finishing first leaves the replacement cancellable.
    drop(first_guard);
    assert!(registry.is_registered("msg_dup"));
    assert_eq!(registry.released_count(), 0);

    assert!(registry.cancel("msg_dup"));
    assert!(second.is_cancelled());
    assert!(!first.is_cancelled());

    drop(second_guard);
    assert!(!registry.is_registered("msg_dup"));
    assert_eq!(registry.released_count(), 1);
}

#[tokio::test]
async fn events_are_delivered_before_next_pull() {
    let pipeline = pipeline();
    let pulled = Arc::new(Mutex::new(Vec::<usize>::new()));
    let seen = Arc::new(Mutex::new(Vec::<usize>::new()));

    let pulled_in_source = Arc::clone(&pulled);
    let seen_in_source = Arc::clone(&seen);
    let source = futures_util::stream::iter(0..3).map(move |i| {
        // By the time chunk i is pulled, every earlier chunk's delta was emitted.
        assert_eq!(seen_in_source.lock().unwrap().len(), i);
        pulled_in_source.lock().unwrap().push(i);
        Ok::<_, PipelineError>(RawChunk::data(format!("{i}")))
    });

    let seen_in_sink = Arc::clone(&seen);
    pipeline
        .run(
            PipelineRequest::new("msg_order", "m"),
            source,
            TextChunkAdapter::new(),
            &mut |event: LifecycleEvent| {
                if let LifecycleEvent::TextDelta { text } = event {
                    seen_in_sink.lock().unwrap().push(text.parse().unwrap());
                }
            },
        )
        .await;

    assert_eq!(*pulled.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
}

#[tokio::test]
async fn empty_response_completes_without_content_events() {
    let pipeline = pipeline();
    let mut kinds = Vec::new();
    let outcome = pipeline
        .run(
            PipelineRequest::new("msg_empty", "m"),
            chunk_source(vec![RawChunk::data("[DONE]")]),
            OpenAiChunkAdapter::new(),
            &mut |event: LifecycleEvent| kinds.push(event.kind()),
        )
        .await;
    assert_eq!(kinds, vec!["response-created", "block-complete"]);
    assert_eq!(outcome.summary().unwrap().finish_reason, FinishReason::Unknown);
}

#[test]
fn explicit_tags_match_dictionary_default() {
    assert_eq!(TagDictionary::builtin().lookup("anything"), &TagPair::think());
}
