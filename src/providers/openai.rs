use crate::config::settings::ProviderConfig;
use crate::error::AppError;
use crate::models::neutral::{NeutralRequest, NeutralResponse, RequestKind, TokenUsage};
use crate::models::stream_event::ChunkEvent;
use crate::providers::client::{build_http_client, resolve_credential};
use crate::providers::streaming::openai_chunk_stream;
use crate::providers::ProviderClient;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use reqwest::Client;
use serde_json::Value;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Adapter for OpenAI's Chat Completions, Embeddings, and audio endpoints.
/// Grounded on the teacher's `OpenAIClient`, stripped of its deep-research
/// polling and Responses-API translation, since those are out of scope here.
pub struct OpenAiProvider {
    http: Client,
    base_url: String,
    config: ProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, AppError> {
        let http = build_http_client(&config)?;
        let base_url = config.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self { http, base_url, config })
    }

    fn endpoint_for(&self, kind: RequestKind) -> &'static str {
        match kind {
            RequestKind::ChatCompletion | RequestKind::TextCompletion | RequestKind::Responses => "chat/completions",
            RequestKind::Embedding => "embeddings",
            RequestKind::SpeechSynthesis => "audio/speech",
            RequestKind::Transcription => "audio/transcriptions",
        }
    }

    fn build_body(&self, request: &NeutralRequest) -> Value {
        let mut body = request.payload.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".to_string(), Value::String(request.model.clone()));
            if matches!(request.kind, RequestKind::ChatCompletion | RequestKind::TextCompletion | RequestKind::Responses) {
                obj.insert("stream".to_string(), Value::Bool(request.streaming));
            }
        }
        body
    }
}

#[async_trait]
impl ProviderClient for OpenAiProvider {
    fn provider_id(&self) -> &'static str {
        "openai"
    }

    async fn send(&self, request: &NeutralRequest) -> Result<NeutralResponse, AppError> {
        if matches!(request.kind, RequestKind::Transcription) {
            return Err(AppError::UnsupportedOperation(
                "openai adapter serves transcription via multipart only, not the neutral send path".to_string(),
            ));
        }

        let credential = resolve_credential(&request.upstream_credential, &self.config)?.to_string();
        let endpoint = self.endpoint_for(request.kind);
        let url = format!("{}/{}", self.base_url, endpoint);
        let body = self.build_body(request);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&credential)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream { status: status.as_u16(), message });
        }

        let value: Value = response.json().await.map_err(|e| AppError::Internal(format!("openai response decode failed: {e}")))?;
        Ok(neutral_response_from_openai(request, value))
    }

    async fn stream(&self, request: &NeutralRequest) -> Result<BoxStream<'static, Result<ChunkEvent, AppError>>, AppError> {
        if !matches!(request.kind, RequestKind::ChatCompletion | RequestKind::TextCompletion | RequestKind::Responses) {
            return Err(AppError::UnsupportedOperation(format!("openai streaming unsupported for {:?}", request.kind)));
        }

        let credential = resolve_credential(&request.upstream_credential, &self.config)?.to_string();
        let url = format!("{}/{}", self.base_url, self.endpoint_for(request.kind));
        let mut body = self.build_body(request);
        if let Some(obj) = body.as_object_mut() {
            obj.insert("stream".to_string(), Value::Bool(true));
        }

        let response = self.http.post(&url).bearer_auth(&credential).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream { status: status.as_u16(), message });
        }

        Ok(openai_chunk_stream(response, request.request_id.to_string()))
    }
}

fn neutral_response_from_openai(request: &NeutralRequest, raw: Value) -> NeutralResponse {
    let usage = raw.get("usage").and_then(|u| {
        let prompt_tokens = u.get("prompt_tokens").or_else(|| u.get("input_tokens"))?.as_i64()?;
        let completion_tokens = u.get("completion_tokens").or_else(|| u.get("output_tokens"))?.as_i64()?;
        let total_tokens = u.get("total_tokens").and_then(|v| v.as_i64()).unwrap_or(prompt_tokens + completion_tokens);
        let cache_read_tokens = u
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
    });

    let choices = raw.get("choices").cloned().or_else(|| raw.get("data").cloned());

    NeutralResponse {
        request_id: request.request_id,
        kind: request.kind,
        choices,
        delta: None,
        is_final: true,
        usage,
        raw: Some(raw),
        extra: Default::default(),
        cost: None,
    }
}
