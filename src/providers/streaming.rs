use crate::error::AppError;
use crate::models::neutral::TokenUsage;
use crate::models::stream_event::ChunkEvent;
use eventsource_stream::Eventsource;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde_json::Value;

/// Converts an upstream SSE byte response into a stream of parsed `(event,
/// data)` pairs, the shared first stage both provider demuxers build on.
fn sse_events(response: reqwest::Response) -> impl Stream<Item = Result<eventsource_stream::Event, AppError>> {
    response
        .bytes_stream()
        .map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })
        .eventsource()
        .map(|event| event.map_err(|e| AppError::Upstream {
            status: 502,
            message: format!("malformed SSE frame: {e}"),
        }))
}

/// Demultiplexes an OpenAI-compatible chat-completion SSE stream into
/// neutral `ChunkEvent`s. OpenAI emits one JSON object per `data:` line and
/// terminates with the literal `[DONE]`.
pub fn openai_chunk_stream(response: reqwest::Response, request_id: String) -> BoxStream<'static, Result<ChunkEvent, AppError>> {
    let stream = sse_events(response).filter_map(move |event| {
        let request_id = request_id.clone();
        async move {
            let event = match event {
                Ok(e) => e,
                Err(e) => return Some(Err(e)),
            };
            if event.data.trim() == "[DONE]" {
                return Some(Ok(ChunkEvent {
                    request_id,
                    role: None,
                    content_delta: None,
                    tool_call_start: None,
                    tool_call_delta: None,
                    stop_reason: None,
                    usage: None,
                    is_final: true,
                }));
            }
            let value: Value = match serde_json::from_str(&event.data) {
                Ok(v) => v,
                Err(_) => return None,
            };
            Some(Ok(parse_openai_chunk(&value, &request_id)))
        }
    });
    Box::pin(stream)
}

fn parse_openai_chunk(value: &Value, request_id: &str) -> ChunkEvent {
    let choice = value.get("choices").and_then(|c| c.get(0));
    let delta = choice.and_then(|c| c.get("delta"));
    let role = delta.and_then(|d| d.get("role")).and_then(|r| r.as_str()).map(str::to_string);
    let content_delta = delta.and_then(|d| d.get("content")).and_then(|c| c.as_str()).map(str::to_string);
    let stop_reason = choice.and_then(|c| c.get("finish_reason")).and_then(|r| r.as_str()).map(str::to_string);
    let usage = value.get("usage").and_then(|u| parse_openai_usage(u));

    ChunkEvent {
        request_id: request_id.to_string(),
        role,
        content_delta,
        tool_call_start: None,
        tool_call_delta: None,
        stop_reason,
        is_final: usage.is_some(),
        usage,
    }
}

fn parse_openai_usage(usage: &Value) -> Option<TokenUsage> {
    let prompt_tokens = usage.get("prompt_tokens")?.as_i64()?;
    let completion_tokens = usage.get("completion_tokens")?.as_i64()?;
    let total_tokens = usage.get("total_tokens").and_then(|v| v.as_i64()).unwrap_or(prompt_tokens + completion_tokens);
    let cache_read_tokens = usage
        .get("prompt_tokens_details")
        .and_then(|d| d.get("cached_tokens"))
        .and_then(|v| v.as_i64());
    Some(TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
        cache_read_tokens,
        ..Default::default()
    })
}

/// Demultiplexes an Anthropic Messages-API SSE stream. Anthropic frames each
/// payload with a named `event:` line (`message_start`, `content_block_delta`,
/// `message_delta`, `message_stop`) rather than a uniform JSON shape.
pub fn anthropic_chunk_stream(response: reqwest::Response, request_id: String) -> BoxStream<'static, Result<ChunkEvent, AppError>> {
    let stream = sse_events(response).filter_map(move |event| {
        let request_id = request_id.clone();
        async move {
            let event = match event {
                Ok(e) => e,
                Err(e) => return Some(Err(e)),
            };
            let value: Value = match serde_json::from_str(&event.data) {
                Ok(v) => v,
                Err(_) => return None,
            };
            parse_anthropic_event(&event.event, &value, &request_id).map(Ok)
        }
    });
    Box::pin(stream)
}

fn parse_anthropic_event(event_type: &str, value: &Value, request_id: &str) -> Option<ChunkEvent> {
    match event_type {
        "content_block_delta" => {
            let text = value.get("delta")?.get("text")?.as_str()?.to_string();
            Some(ChunkEvent {
                request_id: request_id.to_string(),
                role: None,
                content_delta: Some(text),
                tool_call_start: None,
                tool_call_delta: None,
                stop_reason: None,
                usage: None,
                is_final: false,
            })
        }
        "message_start" => {
            let role = value.get("message")?.get("role").and_then(|r| r.as_str()).map(str::to_string);
            Some(ChunkEvent {
                request_id: request_id.to_string(),
                role,
                content_delta: None,
                tool_call_start: None,
                tool_call_delta: None,
                stop_reason: None,
                usage: None,
                is_final: false,
            })
        }
        "message_delta" => {
            let stop_reason = value.get("delta").and_then(|d| d.get("stop_reason")).and_then(|r| r.as_str()).map(str::to_string);
            let usage = value.get("usage").map(|u| TokenUsage {
                prompt_tokens: u.get("input_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
                completion_tokens: u.get("output_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
                total_tokens: 0,
                cache_write_tokens: u.get("cache_creation_input_tokens").and_then(|v| v.as_i64()),
                cache_read_tokens: u.get("cache_read_input_tokens").and_then(|v| v.as_i64()),
                ..Default::default()
            });
            Some(ChunkEvent {
                request_id: request_id.to_string(),
                role: None,
                content_delta: None,
                tool_call_start: None,
                tool_call_delta: None,
                stop_reason,
                usage,
                is_final: false,
            })
        }
        "message_stop" => Some(ChunkEvent {
            request_id: request_id.to_string(),
            role: None,
            content_delta: None,
            tool_call_start: None,
            tool_call_delta: None,
            stop_reason: None,
            usage: None,
            is_final: true,
        }),
        _ => None,
    }
}
