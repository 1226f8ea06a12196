use actix_web::{HttpResponse, error::ResponseError, http::StatusCode};
use serde::{Deserialize, Serialize};
use sqlx::error::Error as SqlxError;
use std::error::Error as StdError;
use std::fmt;

/// Error taxonomy for the gateway core, per the wire-level error contract:
/// every rejected request gets `{error: {message, type, code?}}` and a status
/// code drawn from this table.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    Unauthorized(String),
    VirtualKeyRequired,
    VirtualKeyBlocked(String),
    VirtualKeyNotFound,
    ProviderBlocked(String),
    ModelBlocked(String),
    RateLimited(String),
    TokenLimited(String),
    RequestLimited(String),
    BudgetExceeded(String),
    Dropped,
    Upstream { status: u16, message: String },
    Timeout,
    UnsupportedOperation(String),
    NotFound(String),
    Configuration(String),
    Internal(String),
}

#[derive(Serialize, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    param: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(m) => write!(f, "Validation error: {m}"),
            AppError::Unauthorized(m) => write!(f, "Unauthorized: {m}"),
            AppError::VirtualKeyRequired => write!(f, "x-bf-vk header is required"),
            AppError::VirtualKeyBlocked(m) => write!(f, "Virtual key blocked: {m}"),
            AppError::VirtualKeyNotFound => write!(f, "Virtual key not found"),
            AppError::ProviderBlocked(m) => write!(f, "Provider blocked: {m}"),
            AppError::ModelBlocked(m) => write!(f, "Model blocked: {m}"),
            AppError::RateLimited(m) => write!(f, "Rate limited: {m}"),
            AppError::TokenLimited(m) => write!(f, "Token limited: {m}"),
            AppError::RequestLimited(m) => write!(f, "Request limited: {m}"),
            AppError::BudgetExceeded(m) => write!(f, "Budget exceeded: {m}"),
            AppError::Dropped => write!(f, "Request dropped: provider queue is full"),
            AppError::Upstream { status, message } => {
                write!(f, "Upstream error ({status}): {message}")
            }
            AppError::Timeout => write!(f, "Request timed out"),
            AppError::UnsupportedOperation(m) => write!(f, "Unsupported operation: {m}"),
            AppError::NotFound(m) => write!(f, "Not found: {m}"),
            AppError::Configuration(m) => write!(f, "Configuration error: {m}"),
            AppError::Internal(m) => write!(f, "Internal error: {m}"),
        }
    }
}

impl StdError for AppError {}

impl AppError {
    fn error_type(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::VirtualKeyRequired => "virtual_key_required",
            AppError::VirtualKeyBlocked(_) => "virtual_key_blocked",
            AppError::VirtualKeyNotFound => "virtual_key_not_found",
            AppError::ProviderBlocked(_) => "provider_blocked",
            AppError::ModelBlocked(_) => "model_blocked",
            AppError::RateLimited(_) => "rate_limited",
            AppError::TokenLimited(_) => "token_limited",
            AppError::RequestLimited(_) => "request_limited",
            AppError::BudgetExceeded(_) => "budget_exceeded",
            AppError::Dropped => "dropped",
            AppError::Upstream { .. } => "upstream_error",
            AppError::Timeout => "timeout",
            AppError::UnsupportedOperation(_) => "unsupported_operation",
            AppError::NotFound(_) => "not_found",
            AppError::Configuration(_) => "configuration_error",
            AppError::Internal(_) => "internal",
        }
    }

    /// Only network / timeout / upstream_5xx classes are retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(self, AppError::Timeout)
            || matches!(self, AppError::Upstream { status, .. } if *status >= 500)
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::VirtualKeyRequired => StatusCode::BAD_REQUEST,
            AppError::VirtualKeyBlocked(_) | AppError::VirtualKeyNotFound => StatusCode::FORBIDDEN,
            AppError::ProviderBlocked(_) | AppError::ModelBlocked(_) => StatusCode::FORBIDDEN,
            AppError::RateLimited(_) | AppError::TokenLimited(_) | AppError::RequestLimited(_) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::BudgetExceeded(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::Dropped => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::UnsupportedOperation(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = ErrorResponse {
            error: ErrorBody {
                message: self.to_string(),
                error_type: self.error_type().to_string(),
                code: None,
                event_id: None,
                param: None,
            },
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::NotFound("record not found".to_string()),
            _ => AppError::Internal(format!("database error: {error}")),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Validation(format!("malformed JSON: {error}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            AppError::Timeout
        } else if let Some(status) = error.status() {
            AppError::Upstream {
                status: status.as_u16(),
                message: error.to_string(),
            }
        } else {
            AppError::Internal(format!("upstream transport error: {error}"))
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
