use crate::config::settings::ProviderConfig;
use crate::error::AppError;
use crate::models::neutral::{NeutralRequest, NeutralResponse, RequestKind, TokenUsage};
use crate::models::stream_event::ChunkEvent;
use crate::providers::client::{build_http_client, resolve_credential};
use crate::providers::ProviderClient;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use reqwest::Client;
use serde_json::Value;

const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

/// Adapter for Anthropic models served through Amazon Bedrock's runtime API.
/// Authenticates with a Bedrock long-term API key (`Authorization: Bearer`)
/// rather than full SigV4 request signing, which the teacher's stack has no
/// precedent for and which the gateway's credential model (an opaque
/// per-VK bearer string) does not carry the extra secret/session triple
/// SigV4 would require. No streaming support yet: Bedrock's
/// `invoke-with-response-stream` uses AWS's binary event-stream framing,
/// not SSE, and needs its own demuxer.
pub struct BedrockProvider {
    http: Client,
    base_url: String,
    config: ProviderConfig,
}

impl BedrockProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, AppError> {
        let http = build_http_client(&config)?;
        let region = config.region.clone().unwrap_or_else(|| "us-east-1".to_string());
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://bedrock-runtime.{region}.amazonaws.com"));
        Ok(Self { http, base_url, config })
    }

    fn build_body(&self, request: &NeutralRequest) -> Value {
        let mut body = request.payload.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.remove("model");
            obj.remove("stream");
            obj.insert("anthropic_version".to_string(), Value::String(BEDROCK_ANTHROPIC_VERSION.to_string()));
            obj.entry("max_tokens").or_insert(Value::Number(4096.into()));
        }
        body
    }
}

#[async_trait]
impl ProviderClient for BedrockProvider {
    fn provider_id(&self) -> &'static str {
        "bedrock"
    }

    async fn send(&self, request: &NeutralRequest) -> Result<NeutralResponse, AppError> {
        if !matches!(request.kind, RequestKind::ChatCompletion | RequestKind::TextCompletion | RequestKind::Responses) {
            return Err(AppError::UnsupportedOperation(format!("bedrock adapter does not support {:?}", request.kind)));
        }

        let credential = resolve_credential(&request.upstream_credential, &self.config)?.to_string();
        let url = format!("{}/model/{}/invoke", self.base_url, request.model);
        let body = self.build_body(request);

        let response = self.http.post(&url).bearer_auth(&credential).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream { status: status.as_u16(), message });
        }

        let value: Value = response.json().await.map_err(|e| AppError::Internal(format!("bedrock response decode failed: {e}")))?;
        Ok(neutral_response_from_bedrock(request, value))
    }

    async fn stream(&self, request: &NeutralRequest) -> Result<BoxStream<'static, Result<ChunkEvent, AppError>>, AppError> {
        let _ = request;
        Err(AppError::UnsupportedOperation(
            "bedrock streaming requires AWS event-stream framing, not yet implemented".to_string(),
        ))
    }
}

fn neutral_response_from_bedrock(request: &NeutralRequest, raw: Value) -> NeutralResponse {
    let usage = raw.get("usage").and_then(|u| {
        let input_tokens = u.get("input_tokens")?.as_i64()?;
        let output_tokens = u.get("output_tokens")?.as_i64()?;
        Some(TokenUsage {
            prompt_tokens: input_tokens,
            completion_tokens: output_tokens,
            total_tokens: input_tokens + output_tokens,
            cache_write_tokens: u.get("cache_creation_input_tokens").and_then(|v| v.as_i64()),
            cache_read_tokens: u.get("cache_read_input_tokens").and_then(|v| v.as_i64()),
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
