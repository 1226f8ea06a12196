pub mod anthropic;
pub mod bedrock;
pub mod client;
pub mod openai;
pub mod streaming;

use crate::config::settings::ProviderConfig;
use crate::error::AppError;
use crate::models::neutral::{NeutralRequest, NeutralResponse, UpstreamErrorClass};
use crate::models::stream_event::ChunkEvent;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;

/// Each provider adapter is a capability set: the dispatcher looks it up by
/// provider id and fails fast with `unsupported_operation` when a capability
/// is absent, rather than every adapter implementing every operation.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider_id(&self) -> &'static str;

    async fn send(&self, request: &NeutralRequest) -> Result<NeutralResponse, AppError> {
        let _ = request;
        Err(AppError::UnsupportedOperation(format!(
            "{} does not support unary requests",
            self.provider_id()
        )))
    }

    async fn stream(&self, request: &NeutralRequest) -> Result<BoxStream<'static, Result<ChunkEvent, AppError>>, AppError> {
        let _ = request;
        Err(AppError::UnsupportedOperation(format!(
            "{} does not support streaming requests",
            self.provider_id()
        )))
    }
}

/// Constructs the adapter named by `config.name`, used when the gateway
/// bootstraps a `Dispatcher` from `AppSettings.providers`.
pub fn build_client(config: ProviderConfig) -> Result<Arc<dyn ProviderClient>, AppError> {
    match config.name.as_str() {
        "openai" => Ok(Arc::new(openai::OpenAiProvider::new(config)?)),
        "anthropic" => Ok(Arc::new(anthropic::AnthropicProvider::new(config)?)),
        "bedrock" => Ok(Arc::new(bedrock::BedrockProvider::new(config)?)),
        other => Err(AppError::Configuration(format!("no adapter registered for provider '{other}'"))),
    }
}

/// Classifies a transport-level failure the way the retry policy requires so
/// the dispatcher's retry logic can decide without re-inspecting the error.
pub fn classify_reqwest_error(error: &reqwest::Error) -> UpstreamErrorClass {
    if error.is_timeout() {
        return UpstreamErrorClass::Timeout;
    }
    if error.is_connect() || error.is_request() {
        return UpstreamErrorClass::Network;
    }
    match error.status() {
        Some(status) if status.is_server_error() => UpstreamErrorClass::Upstream5xx,
        Some(status) if status.is_client_error() => UpstreamErrorClass::Upstream4xx,
        _ => UpstreamErrorClass::Malformed,
    }
}
