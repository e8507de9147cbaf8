//! Diagnostic logging of forwarded traffic.
//!
//! Everything here only formats and redacts; callers decide what to log.
//! Bodies are rendered as JSON and truncated to `LOG_BODY_MAX_CHARS`
//! characters; inline image data and credentials never reach the log.

use serde::Serialize;
use serde_json::Value;

use crate::config::ServerConfig;
use crate::models::chat::ChatCompletionRequest;
use crate::models::messages::MessagesRequest;
use crate::streaming::StreamStats;

const TRUNCATED_SUFFIX: &str = "...(truncated)";

/// Log the inbound summary and the request about to be sent upstream.
pub fn log_forwarded_request(
    config: &ServerConfig,
    inbound: &MessagesRequest,
    outbound: &ChatCompletionRequest,
) {
    let max = config.log_body_max;
    let summary = serde_json::json!({
        "model": inbound.model,
        "max_tokens": outbound.max_tokens,
        "stream": inbound.stream,
        "messages": inbound.messages.len(),
        "tools": inbound.tools.len(),
    });
    tracing::info!(summary = %json_truncated(&summary, max), "inbound request");

    let headers = serde_json::json!({
        "Content-Type": "application/json",
        "Authorization": "Bearer <redacted>",
    });
    tracing::debug!(
        url = %config.upstream_url,
        headers = %json_truncated(&headers, max),
        body = %json_truncated(&sanitized_request(outbound), max),
        "forwarding request"
    );
}

/// Log a raw upstream body (error replies, unparseable responses).
pub fn log_upstream_body(config: &ServerConfig, body: &[u8]) {
    if config.log_body_max == 0 {
        return;
    }
    let text = String::from_utf8_lossy(body);
    tracing::info!(body = %truncate_chars(&text, config.log_body_max), "upstream body");
}

/// Log the counters gathered while re-framing one stream.
pub fn log_stream_summary(stats: &StreamStats) {
    tracing::info!(
        chunks = stats.chunks,
        text_chars = stats.text_chars,
        tool_delta_chunks = stats.tool_fragments,
        tool_args_chars = stats.tool_arg_chars,
        finish_reason = stats.finish_reason.as_deref().unwrap_or_default(),
        saw_done = stats.saw_done,
        preview = %stats.preview,
        "stream summary"
    );
}

/// First `max` characters of `s`, never splitting a character.
pub fn take_first_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    let head = take_first_chars(s, max);
    if head.len() < s.len() {
        format!("{head}{TRUNCATED_SUFFIX}")
    } else {
        s.to_string()
    }
}

/// Serialize `value` for the log, honoring the character limit (0 disables).
pub fn json_truncated<T: Serialize + ?Sized>(value: &T, max: usize) -> String {
    if max == 0 {
        return "(disabled)".to_string();
    }
    match serde_json::to_string(value) {
        Ok(s) => truncate_chars(&s, max),
        Err(e) => serde_json::json!({
            "_error": "json_marshal_failed",
            "detail": e.to_string(),
        })
        .to_string(),
    }
}

/// Outbound request as JSON with inline `data:` image urls redacted.
pub fn sanitized_request(req: &ChatCompletionRequest) -> Value {
    let mut v = serde_json::to_value(req).unwrap_or(Value::Null);
    let parts = v
        .get_mut("messages")
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
        .filter_map(|m| m.get_mut("content").and_then(Value::as_array_mut))
        .flatten();
    for part in parts {
        if part.get("type").and_then(Value::as_str) != Some("image_url") {
            continue;
        }
        if let Some(url) = part.pointer_mut("/image_url/url") {
            if url.as_str().is_some_and(|u| u.starts_with("data:")) {
                *url = Value::String("data:<redacted>".to_string());
            }
        }
    }
    v
}
