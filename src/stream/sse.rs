//! SSE (Server-Sent Events) frame parser and byte-stream framing.
//!
//! Handles the low-level parsing of SSE frames from a byte stream,
//! including buffering partial lines and handling field semantics per the
//! [SSE standard](https://html.spec.whatwg.org/multipage/server-sent-events.html).

use super::SseEvent;
use crate::error::PipelineError;
use futures_util::Stream;
use memchr::memchr_iter;
use std::collections::VecDeque;

// ---------------------------------------------------------------------------
// SseParser — incremental SSE line parser
// ---------------------------------------------------------------------------

/// Incremental SSE line parser.
///
/// Feed it raw text chunks (potentially arriving in arbitrary byte
/// boundaries) and it yields fully-assembled [`SseEvent`] frames.
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
    last_event_id: Option<String>,
    retry: Option<u64>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            event_type: None,
            data_buffer: String::new(),
            has_data: false,
            last_event_id: None,
            retry: None,
        }
    }

    /// Feed raw text and return any complete events parsed.
    ///
    /// SSE framing rules:
    /// - Lines starting with `event:` set the event type for the next frame
    /// - Lines starting with `data:` append to the data buffer (strip one
    ///   leading space after the colon)
    /// - Empty lines (`\n\n`) terminate a frame — emit it and reset
    /// - Lines starting with `:` are comments, ignored
    /// - `id:` sets the last event ID, `retry:` the reconnection hint
    /// - Handle multi-line data (multiple `data:` lines joined with `\n`)
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete events into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        let bytes = self.buffer.as_bytes();
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                &mut self.last_event_id,
                &mut self.retry,
                out,
            );
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush a trailing frame that was never terminated by a blank line.
    ///
    /// Captured response bodies frequently end right after the last `data:`
    /// line; that frame is still delivered rather than silently discarded.
    pub fn finish_into(&mut self, out: &mut Vec<SseEvent>) {
        if self.read_offset < self.buffer.len() {
            let tail = self.buffer[self.read_offset..].to_string();
            let line = tail.strip_suffix('\r').unwrap_or(&tail);
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                &mut self.last_event_id,
                &mut self.retry,
                out,
            );
        }
        self.buffer.clear();
        self.read_offset = 0;
        Self::process_line(
            "",
            &mut self.event_type,
            &mut self.data_buffer,
            &mut self.has_data,
            &mut self.last_event_id,
            &mut self.retry,
            out,
        );
    }

    fn process_line(
        line: &str,
        event_type: &mut Option<String>,
        data_buffer: &mut String,
        has_data: &mut bool,
        last_event_id: &mut Option<String>,
        retry: &mut Option<u64>,
        events: &mut Vec<SseEvent>,
    ) {
        if line.is_empty() {
            // Empty line = dispatch event
            if *has_data {
                events.push(SseEvent {
                    event: event_type.take(),
                    data: std::mem::take(data_buffer),
                    id: last_event_id.clone(),
                    retry: retry.take(),
                });
                *has_data = false;
            } else {
                *event_type = None;
            }
            return;
        }

        // Comment line — ignore
        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            // Strip exactly one leading space after "data:"
            let value = value.strip_prefix(' ').unwrap_or(value);
            if *has_data {
                data_buffer.push('\n');
            } else {
                *has_data = true;
            }
            data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *event_type = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *last_event_id = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("retry:") {
            *retry = value.trim().parse::<u64>().ok();
        }
        // Unknown field names are ignored
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

/// Decode `bytes` (prefixed by any carried-over partial UTF-8 sequence) and
/// feed the valid prefix to the parser. An incomplete trailing sequence is
/// kept in `remainder` for the next chunk.
fn feed_utf8(
    parser: &mut SseParser,
    remainder: &mut Vec<u8>,
    bytes: &[u8],
    parsed: &mut Vec<SseEvent>,
) -> Result<(), PipelineError> {
    let owned;
    let input: &[u8] = if remainder.is_empty() {
        bytes
    } else {
        remainder.extend_from_slice(bytes);
        owned = std::mem::take(remainder);
        &owned
    };

    match std::str::from_utf8(input) {
        Ok(text) => {
            parser.feed_into(text, parsed);
            Ok(())
        }
        Err(e) if e.error_len().is_some() => Err(PipelineError::Source(format!(
            "invalid UTF-8 in event stream at byte {}",
            e.valid_up_to()
        ))),
        Err(e) => {
            let valid_up_to = e.valid_up_to();
            // Safety: valid_up_to is guaranteed to be a valid UTF-8 boundary.
            let text = unsafe { std::str::from_utf8_unchecked(&input[..valid_up_to]) };
            parser.feed_into(text, parsed);
            remainder.extend_from_slice(&input[valid_up_to..]);
            Ok(())
        }
    }
}

/// Split a byte stream into raw SSE chunks using [`SseParser`].
///
/// Bytes arriving from a response body are decoded as UTF-8 (sequences split
/// across chunks are reassembled), fed into the parser, and complete
/// [`SseEvent`] frames are yielded. A byte-stream error, or a body that ends
/// mid-sequence, is surfaced once as [`PipelineError::Source`] and ends the
/// stream.
pub fn sse_chunk_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<SseEvent, PipelineError>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    use futures_util::StreamExt;

    struct State<S> {
        stream: std::pin::Pin<Box<S>>,
        parser: SseParser,
        remainder: Vec<u8>,
        parsed: Vec<SseEvent>,
        pending: VecDeque<SseEvent>,
        done: bool,
    }

    futures_util::stream::unfold(
        State {
            stream: Box::pin(byte_stream),
            parser: SseParser::new(),
            remainder: Vec::new(),
            parsed: Vec::with_capacity(8),
            pending: VecDeque::with_capacity(8),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((Ok(event), state));
                }
                if state.done {
                    return None;
                }

                match state.stream.as_mut().next().await {
                    Some(Ok(bytes)) => {
                        if let Err(err) = feed_utf8(
                            &mut state.parser,
                            &mut state.remainder,
                            &bytes,
                            &mut state.parsed,
                        ) {
                            state.done = true;
                            return Some((Err(err), state));
                        }
                    }
                    Some(Err(err)) => {
                        state.done = true;
                        return Some((Err(PipelineError::Source(err.to_string())), state));
                    }
                    None => {
                        state.done = true;
                        if !state.remainder.is_empty() {
                            let err = PipelineError::Source(format!(
                                "event stream ended inside a UTF-8 sequence ({} trailing bytes)",
                                state.remainder.len()
                            ));
                            return Some((Err(err), state));
                        }
                        state.parser.finish_into(&mut state.parsed);
                    }
                }
                state.pending.extend(state.parsed.drain(..));
            }
        },
    )
}
