use crate::models::stream_event::ChunkEvent;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// The operation a request/response pair is performing. Mirrors the pricing
/// manager's `mode` axis and the provider adapter's capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    TextCompletion,
    ChatCompletion,
    Responses,
    Embedding,
    SpeechSynthesis,
    Transcription,
}

/// A request normalised away from any provider's on-wire format. Exactly one
/// of the operation-specific payloads is populated; callers build this value
/// from the transport layer and it flows unchanged through the plugin chain
/// and dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeutralRequest {
    pub request_id: Uuid,
    pub kind: RequestKind,
    pub streaming: bool,
    pub provider: String,
    pub model: String,
    pub payload: Value,
    pub params: Option<Value>,
    pub fallbacks: Vec<String>,
    /// Bearer/api-key credential to present upstream. Populated by the
    /// governance plugin from the VK's credential set, or from the caller's
    /// own `Authorization`/`x-api-key` header when `allow_direct_keys` is on.
    /// `None` falls back to the provider's statically configured key.
    pub upstream_credential: Option<String>,
}

impl NeutralRequest {
    pub fn new(kind: RequestKind, provider: impl Into<String>, model: impl Into<String>, payload: Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            kind,
            streaming: false,
            provider: provider.into(),
            model: model.into(),
            payload,
            params: None,
            fallbacks: Vec::new(),
            upstream_credential: None,
        }
    }

    /// Invariant: provider and model are non-empty after normalisation.
    pub fn is_normalised(&self) -> bool {
        !self.provider.is_empty() && !self.model.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub audio_prompt_tokens: Option<i64>,
    pub audio_completion_tokens: Option<i64>,
    pub cache_read_tokens: Option<i64>,
    pub cache_write_tokens: Option<i64>,
    /// Duration in seconds, used for audio-by-duration pricing.
    pub audio_seconds: Option<f64>,
}

impl TokenUsage {
    pub fn merge_with(&mut self, other: &TokenUsage) {
        if other.prompt_tokens != 0 {
            self.prompt_tokens = other.prompt_tokens;
        }
        if other.completion_tokens != 0 {
            self.completion_tokens = other.completion_tokens;
        }
        if other.total_tokens != 0 {
            self.total_tokens = other.total_tokens;
        }
        self.audio_prompt_tokens = other.audio_prompt_tokens.or(self.audio_prompt_tokens);
        self.audio_completion_tokens = other.audio_completion_tokens.or(self.audio_completion_tokens);
        self.cache_read_tokens = other.cache_read_tokens.or(self.cache_read_tokens);
        self.cache_write_tokens = other.cache_write_tokens.or(self.cache_write_tokens);
        self.audio_seconds = other.audio_seconds.or(self.audio_seconds);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheDebug {
    pub cache_hit: bool,
    pub hit_type: Option<String>,
    pub provider_used: Option<String>,
    pub model_used: Option<String>,
    pub input_tokens: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtraFields {
    pub provider: Option<String>,
    pub model_requested: Option<String>,
    pub request_type: Option<String>,
    pub cache_debug: Option<CacheDebug>,
}

/// A response normalised to the same provider-neutral shape as `NeutralRequest`.
/// For a stream, at most one chunk carries `is_final = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeutralResponse {
    pub request_id: Uuid,
    pub kind: RequestKind,
    pub choices: Option<Value>,
    pub delta: Option<Value>,
    pub is_final: bool,
    pub usage: Option<TokenUsage>,
    pub raw: Option<Value>,
    pub extra: ExtraFields,
    pub cost: Option<BigDecimal>,
}

impl NeutralResponse {
    pub fn non_stream(request_id: Uuid, kind: RequestKind, choices: Value) -> Self {
        Self {
            request_id,
            kind,
            choices: Some(choices),
            delta: None,
            is_final: true,
            usage: None,
            raw: None,
            extra: ExtraFields::default(),
            cost: None,
        }
    }

    /// Wraps one streamed chunk as a `NeutralResponse` so it can run through
    /// the same PostHook chain a non-stream response does; `choices` stays
    /// `None` since a delta, not a full message, is what a stream chunk is.
    pub fn from_chunk(request_id: Uuid, kind: RequestKind, chunk: &ChunkEvent) -> Self {
        Self {
            request_id,
            kind,
            choices: None,
            delta: Some(json!({
                "role": chunk.role,
                "content": chunk.content_delta,
            })),
            is_final: chunk.is_final,
            usage: chunk.usage.clone(),
            raw: None,
            extra: ExtraFields::default(),
            cost: None,
        }
    }
}

/// Upstream failure classification, per the spec's error-handling design.
/// Only `Network`, `Timeout`, and `Upstream5xx` are retriable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorClass {
    Network,
    Timeout,
    Upstream4xx,
    Upstream5xx,
    Malformed,
    UnsupportedOperation,
}

impl UpstreamErrorClass {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            UpstreamErrorClass::Network | UpstreamErrorClass::Timeout | UpstreamErrorClass::Upstream5xx
        )
    }
}
