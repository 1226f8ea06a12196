use crate::config::settings::ProviderConfig;
use crate::error::AppError;
use crate::models::neutral::{NeutralRequest, NeutralResponse, RequestKind, TokenUsage};
use crate::models::stream_event::ChunkEvent;
use crate::providers::client::{build_http_client, resolve_credential};
use crate::providers::streaming::anthropic_chunk_stream;
use crate::providers::ProviderClient;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use reqwest::Client;
use serde_json::Value;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Adapter for Anthropic's Messages API. Grounded on the teacher's
/// `AnthropicClient`; the cached/uncached token split is preserved in usage
/// parsing but the header-based x-api-key scheme replaces bearer auth.
pub struct AnthropicProvider {
    http: Client,
    base_url: String,
    config: ProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, AppError> {
        let http = build_http_client(&config)?;
        let base_url = config.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self { http, base_url, config })
    }

    fn build_body(&self, request: &NeutralRequest, stream: bool) -> Value {
        let mut body = request.payload.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".to_string(), Value::String(request.model.clone()));
            obj.insert("stream".to_string(), Value::Bool(stream));
            obj.entry("max_tokens").or_insert(Value::Number(4096.into()));
        }
        body
    }
}

#[async_trait]
impl ProviderClient for AnthropicProvider {
    fn provider_id(&self) -> &'static str {
        "anthropic"
    }

    async fn send(&self, request: &NeutralRequest) -> Result<NeutralResponse, AppError> {
        if !matches!(request.kind, RequestKind::ChatCompletion | RequestKind::TextCompletion | RequestKind::Responses) {
            return Err(AppError::UnsupportedOperation(format!("anthropic adapter does not support {:?}", request.kind)));
        }

        let credential = resolve_credential(&request.upstream_credential, &self.config)?.to_string();
        let url = format!("{}/messages", self.base_url);
        let body = self.build_body(request, false);

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &credential)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream { status: status.as_u16(), message });
        }

        let value: Value = response.json().await.map_err(|e| AppError::Internal(format!("anthropic response decode failed: {e}")))?;
        Ok(neutral_response_from_anthropic(request, value))
    }

    async fn stream(&self, request: &NeutralRequest) -> Result<BoxStream<'static, Result<ChunkEvent, AppError>>, AppError> {
        if !matches!(request.kind, RequestKind::ChatCompletion | RequestKind::TextCompletion | RequestKind::Responses) {
            return Err(AppError::UnsupportedOperation(format!("anthropic streaming unsupported for {:?}", request.kind)));
        }

        let credential = resolve_credential(&request.upstream_credential, &self.config)?.to_string();
        let url = format!("{}/messages", self.base_url);
        let body = self.build_body(request, true);

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &credential)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream { status: status.as_u16(), message });
        }

        Ok(anthropic_chunk_stream(response, request.request_id.to_string()))
    }
}

fn neutral_response_from_anthropic(request: &NeutralRequest, raw: Value) -> NeutralResponse {
    let usage = raw.get("usage").and_then(|u| {
        let input_tokens = u.get("input_tokens")?.as_i64()?;
        let output_tokens = u.get("output_tokens")?.as_i64()?;
        let cache_write_tokens = u.get("cache_creation_input_tokens").and_then(|v| v.as_i64());
        let cache_read_tokens = u.get("cache_read_input_tokens").and_then(|v| v.as_i64());
        Some(TokenUsage {
            prompt_tokens: input_tokens,
            completion_tokens: output_tokens,
            total_tokens: input_tokens + output_tokens,
            cache_write_tokens,
            cache_read_tokens,
            ..Default::default()
        })
    });

    NeutralResponse {
        request_id: request.request_id,
        kind: request.kind,
        choices: raw.get("content").cloned(),
        delta: None,
        is_final: true,
        usage,
        raw: Some(raw),
        extra: Default::default(),
        cost: None,
    }
}
