use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A (provider, weight, allowed-models) tuple attached to a virtual key, used
/// for weighted provider selection and access filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAllowance {
    pub provider: String,
    pub weight: f64,
    pub allowed_models: Vec<String>,
}

impl ProviderAllowance {
    pub fn allows_model(&self, model: &str) -> bool {
        self.allowed_models.is_empty() || self.allowed_models.iter().any(|m| m == model)
    }
}

/// Which org grouping a virtual key joins, at most one of the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OwnerRef {
    Team(Uuid),
    Customer(Uuid),
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualKey {
    pub id: Uuid,
    /// The opaque value presented in the `x-bf-vk` header. Unique and
    /// immutable after creation.
    pub value: String,
    pub name: String,
    pub active: bool,
    pub description: Option<String>,
    pub providers: Vec<ProviderAllowance>,
    pub upstream_credential_set: Option<String>,
    pub budget_id: Option<Uuid>,
    pub rate_limit_id: Option<Uuid>,
    pub owner: OwnerRef,
}

impl VirtualKey {
    pub fn provider_allowed(&self, provider: &str) -> bool {
        self.providers.is_empty() || self.providers.iter().any(|p| p.provider == provider)
    }

    pub fn allowance_for(&self, provider: &str) -> Option<&ProviderAllowance> {
        self.providers.iter().find(|p| p.provider == provider)
    }
}

/// `max_limit`/`current_usage` are currency units; arithmetic is BigDecimal
/// throughout, never f64, once a value has left the provider's raw JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub id: Uuid,
    pub max_limit: BigDecimal,
    pub current_usage: BigDecimal,
    pub last_reset: DateTime<Utc>,
    pub reset_duration: String,
}

impl Budget {
    pub fn would_exceed(&self, projected_cost: &BigDecimal) -> bool {
        &self.current_usage + projected_cost > self.max_limit
    }

    pub fn is_exceeded(&self) -> bool {
        self.current_usage >= self.max_limit
    }
}

/// One sliding counter (token-usage or request-usage). Either counter on a
/// `RateLimit` may be absent, meaning unlimited for that dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidingCounter {
    pub max_limit: i64,
    pub current_usage: i64,
    pub reset_duration: String,
    pub last_reset: DateTime<Utc>,
}

impl SlidingCounter {
    pub fn is_exceeded(&self) -> bool {
        self.current_usage >= self.max_limit
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimit {
    pub id: Uuid,
    pub token_limit: Option<SlidingCounter>,
    pub request_limit: Option<SlidingCounter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub customer_id: Option<Uuid>,
    pub budget_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub budget_id: Option<Uuid>,
}

/// Input to the budget resolver.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub vk_value: String,
    pub provider: String,
    pub model: String,
    pub request_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationDecision {
    Allow,
    VirtualKeyNotFound,
    VirtualKeyBlocked,
    ProviderBlocked,
    ModelBlocked,
    RateLimited(String),
    TokenLimited,
    RequestLimited,
    BudgetExceeded(String),
}

#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub decision: EvaluationDecision,
    /// Upstream credential IDs the VK restricts to, emitted on `Allow` so the
    /// dispatcher can honour the whitelist.
    pub allowed_credentials: Vec<String>,
}

impl EvaluationResult {
    pub fn allow(allowed_credentials: Vec<String>) -> Self {
        Self {
            decision: EvaluationDecision::Allow,
            allowed_credentials,
        }
    }

    pub fn deny(decision: EvaluationDecision) -> Self {
        Self {
            decision,
            allowed_credentials: Vec::new(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == EvaluationDecision::Allow
    }
}
