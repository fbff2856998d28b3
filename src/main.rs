use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use thinkstream_rs::config::{load_config, AppConfig};
use thinkstream_rs::error::PipelineError;
use thinkstream_rs::observability::init_tracing;
use thinkstream_rs::pipeline::{LifecycleEvent, PipelineOutcome, PipelineRequest};
use thinkstream_rs::protocol::adapter_for;
use thinkstream_rs::protocol::canonical::ProviderKind;
use thinkstream_rs::state::{AppState, CancellationRegistry};
use thinkstream_rs::stream::{sse_chunk_stream, RawChunk};

const DEFAULT_CHUNK_SIZE: usize = 64;
const USAGE: &str = "usage: thinkstream [--config PATH] [--provider openai|anthropic|gemini|text] \
[--model ID] [--timeout-ms N] [--chunk-size N] <capture-file | ->";

#[derive(Debug, Default)]
struct CliArgs {
    config: Option<String>,
    provider: Option<ProviderKind>,
    model: String,
    timeout_ms: Option<u64>,
    chunk_size: usize,
    input: String,
}

fn main() {
    let args = parse_args(std::env::args().skip(1)).unwrap_or_else(|e| {
        eprintln!("{e}");
        eprintln!("{USAGE}");
        std::process::exit(2);
    });

    let config = match &args.config {
        Some(path) => load_config(path).unwrap_or_else(|e| {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }),
        None => AppConfig::default(),
    };

    init_tracing(&config.features.log_level);

    let capture = read_capture(&args.input).unwrap_or_else(|e| {
        eprintln!("Failed to read capture '{}': {e}", args.input);
        std::process::exit(1);
    });

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    let code = runtime.block_on(run(args, config, capture));
    std::process::exit(code);
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs, String> {
    let mut parsed = CliArgs {
        chunk_size: DEFAULT_CHUNK_SIZE,
        ..CliArgs::default()
    };
    let mut input = None;

    while let Some(arg) = args.next() {
        let mut value = |flag: &str| args.next().ok_or_else(|| format!("{flag} expects a value"));
        match arg.as_str() {
            "--config" => parsed.config = Some(value("--config")?),
            "--provider" => {
                let raw = value("--provider")?;
                parsed.provider = Some(
                    ProviderKind::parse(&raw).ok_or_else(|| format!("unknown provider '{raw}'"))?,
                );
            }
            "--model" => parsed.model = value("--model")?,
            "--timeout-ms" => {
                let raw = value("--timeout-ms")?;
                parsed.timeout_ms = Some(
                    raw.parse()
                        .map_err(|_| format!("--timeout-ms expects an integer, got '{raw}'"))?,
                );
            }
            "--chunk-size" => {
                let raw = value("--chunk-size")?;
                parsed.chunk_size = raw
                    .parse()
                    .ok()
                    .filter(|size: &usize| *size > 0)
                    .ok_or_else(|| format!("--chunk-size expects a positive integer, got '{raw}'"))?;
            }
            "-h" | "--help" => return Err("thinkstream replays a captured completion stream".into()),
            flag if flag.starts_with("--") => return Err(format!("unknown flag '{flag}'")),
            _ if input.is_some() => return Err(format!("unexpected argument '{arg}'")),
            _ => input = Some(arg),
        }
    }

    parsed.input = input.ok_or("missing capture file")?;
    Ok(parsed)
}

fn read_capture(input: &str) -> io::Result<Vec<u8>> {
    if input == "-" {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read(input)
    }
}

/// Split `capture` into network-sized pieces and frame it for `provider`.
///
/// Provider captures are SSE bodies. A `text` capture is the raw completion
/// text, split on char boundaries so each piece is one text delta. Every
/// piece yields to the scheduler first, like a network read would, so the
/// timeout task runs while the replay is in progress.
fn capture_source(
    capture: Vec<u8>,
    provider: ProviderKind,
    chunk_size: usize,
) -> BoxStream<'static, Result<RawChunk, PipelineError>> {
    if provider == ProviderKind::Text {
        let text = match String::from_utf8(capture) {
            Ok(text) => text,
            Err(e) => {
                let err = PipelineError::Source(format!("capture is not UTF-8: {e}"));
                return stream::iter([Err(err)]).boxed();
            }
        };
        return paced(stream::iter(split_text(&text, chunk_size).into_iter().map(Ok))).boxed();
    }

    let body = Bytes::from(capture);
    let pieces: Vec<Result<Bytes, io::Error>> = (0..body.len())
        .step_by(chunk_size)
        .map(|start| Ok(body.slice(start..(start + chunk_size).min(body.len()))))
        .collect();
    sse_chunk_stream(paced(stream::iter(pieces))).boxed()
}

fn paced<S: futures_util::Stream>(pieces: S) -> impl futures_util::Stream<Item = S::Item> {
    pieces.then(|piece| async move {
        tokio::task::yield_now().await;
        piece
    })
}

/// Cancel `message_id` through the registry once `timeout_ms` elapses.
fn spawn_timeout(
    registry: Arc<CancellationRegistry>,
    message_id: String,
    timeout_ms: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
        tracing::info!(message_id = %message_id, timeout_ms, "replay timed out");
        registry.cancel(&message_id);
    })
}

fn split_text(text: &str, chunk_size: usize) -> Vec<RawChunk> {
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + chunk_size).min(text.len());
        while !text.is_char_boundary(end) {
            end += 1;
        }
        chunks.push(RawChunk::data(&text[start..end]));
        start = end;
    }
    chunks
}

async fn run(args: CliArgs, config: AppConfig, capture: Vec<u8>) -> i32 {
    let provider = args.provider.unwrap_or(config.pipeline.provider);
    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Failed to build pipeline: {e}");
            return 1;
        }
    };

    let message_id = state.next_message_id();
    let request = PipelineRequest::new(message_id.clone(), args.model.clone());
    let source = capture_source(capture, provider, args.chunk_size);

    // The pipeline has no internal deadline; the timeout cancels through the
    // registry like any other caller would.
    let timer = args
        .timeout_ms
        .map(|ms| spawn_timeout(Arc::clone(state.registry()), message_id.clone(), ms));

    tracing::info!(
        message_id = %message_id,
        model = %args.model,
        provider = ?provider,
        chunk_size = args.chunk_size,
        "replaying capture"
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut write_error: Option<io::Error> = None;
    let mut sink = |event: LifecycleEvent| {
        if write_error.is_some() {
            return;
        }
        let written = serde_json::to_writer(&mut out, &event)
            .map_err(io::Error::from)
            .and_then(|()| out.write_all(b"\n"));
        if let Err(e) = written {
            write_error = Some(e);
        }
    };

    let outcome = state
        .pipeline()
        .run(request, source, adapter_for(provider), &mut sink)
        .await;

    if let Some(timer) = timer {
        timer.abort();
    }
    if let Err(e) = out.flush() {
        if write_error.is_none() {
            write_error = Some(e);
        }
    }
    if let Some(e) = write_error {
        eprintln!("Failed to write events: {e}");
        return 1;
    }

    match outcome {
        PipelineOutcome::Completed(_) => 0,
        PipelineOutcome::Failed(err) => {
            eprintln!("Replay failed: {err}");
            1
        }
        PipelineOutcome::Aborted => {
            eprintln!("Replay aborted");
            1
        }
    }
}
