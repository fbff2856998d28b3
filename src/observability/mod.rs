use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::protocol::canonical::{FinishReason, Usage};

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// Output goes to stderr so that stdout stays free for event output.
pub fn init_tracing(log_level: &str) {
    let Some(tracing_level) = tracing_level(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

fn tracing_level(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Timing of one completed response.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseTimings {
    pub total: Duration,
    pub first_token: Option<Duration>,
    pub thinking: Option<Duration>,
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[must_use]
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Log a completed response at INFO level.
pub fn log_request_complete(
    model: &str,
    finish_reason: FinishReason,
    usage: Option<&Usage>,
    timings: ResponseTimings,
) {
    let usage = usage.cloned().unwrap_or_default();
    info!(
        model = model,
        finish_reason = ?finish_reason,
        input_tokens = usage.input_tokens.unwrap_or(0),
        output_tokens = usage.output_tokens.unwrap_or(0),
        total_tokens = usage.total_tokens.unwrap_or(0),
        first_token_ms = timings.first_token.map_or(0, millis),
        thinking_ms = timings.thinking.map_or(0, millis),
        duration_seconds = timings.total.as_secs_f64(),
        "request completed"
    );
}
