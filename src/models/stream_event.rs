use super::error_details::ErrorDetails;
use super::neutral::TokenUsage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single neutral chunk event yielded by an upstream provider client while
/// demuxing its wire stream format (SSE or AWS event-stream framing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkEvent {
    pub request_id: String,
    pub role: Option<String>,
    pub content_delta: Option<String>,
    pub tool_call_start: Option<ToolCallStart>,
    pub tool_call_delta: Option<ToolCallDelta>,
    pub stop_reason: Option<String>,
    pub usage: Option<TokenUsage>,
    /// Set by the provider client on the last chunk of a stream.
    pub is_final: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallStart {
    pub index: usize,
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    pub arguments_delta: String,
}

/// Strongly-typed SSE events emitted to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum StreamEvent {
    StreamStarted { request_id: String },
    ContentChunk(Value),
    UsageUpdate(TokenUsage),
    StreamCancelled { request_id: String, reason: String },
    ErrorDetails { request_id: String, error: ErrorDetails },
    StreamCompleted,
}

/// Output of the partial-JSON repair plugin and the streaming accumulator
/// when a chunk cannot be safely forwarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamControl {
    pub skip_stream: bool,
}
