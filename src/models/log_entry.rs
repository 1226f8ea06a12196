use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum LogStatus {
    #[default]
    Processing,
    Success,
    Error,
}

/// One row per request, updated through its lifecycle by the logging plugin.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LogEntry {
    pub request_id: Uuid,
    pub parent_request_id: Option<Uuid>,
    pub status: LogStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub input_history: Value,
    pub parameters: Option<Value>,
    pub tools: Option<Value>,
    pub streaming: bool,
    pub output_message: Option<Value>,
    pub embedding_output: Option<Value>,
    pub speech_output: Option<Value>,
    pub transcription_output: Option<Value>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub cost: Option<BigDecimal>,
    pub cache_debug: Option<Value>,
    pub error_details: Option<Value>,
    pub latency_ms: Option<i64>,
}

impl LogEntry {
    pub fn new_processing(request_id: Uuid, provider: &str, model: &str, streaming: bool, input_history: Value) -> Self {
        let now = Utc::now();
        Self {
            request_id,
            parent_request_id: None,
            status: LogStatus::Processing,
            created_at: now,
            updated_at: now,
            provider: provider.to_string(),
            model: model.to_string(),
            input_history,
            parameters: None,
            tools: None,
            streaming,
            output_message: None,
            embedding_output: None,
            speech_output: None,
            transcription_output: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            cost: None,
            cache_debug: None,
            error_details: None,
            latency_ms: None,
        }
    }

    pub fn as_fallback_of(mut self, parent_request_id: Uuid) -> Self {
        self.parent_request_id = Some(parent_request_id);
        self
    }
}
