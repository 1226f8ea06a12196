use crate::models::neutral::NeutralRequest;
use std::collections::HashMap;
use uuid::Uuid;

/// Per-request context threaded through the plugin chain. Plugins needing
/// to pass their own data between their own PreHook and PostHook keep it in
/// a plugin-owned map keyed by `request_id` rather than widening this
/// struct.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub vk_value: Option<String>,
    pub team: Option<String>,
    pub customer: Option<String>,
    pub user: Option<String>,
    /// Set when a PreHook short-circuits the request, so PostHook consumers
    /// can distinguish true upstream calls from short-circuits.
    pub rejected: bool,
    /// Set when the logging plugin's create call was itself skipped, so its
    /// PostHook knows not to attempt an update.
    pub dropped_create: bool,
    /// Present when this request is a fallback attempt, pointing at the
    /// original request-id.
    pub parent_request_id: Option<Uuid>,
    pub headers: HashMap<String, String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl RequestContext {
    pub fn new(request_id: Uuid, headers: HashMap<String, String>) -> Self {
        Self {
            request_id,
            vk_value: headers.get("x-bf-vk").cloned(),
            team: headers.get("x-bf-team").cloned(),
            customer: headers.get("x-bf-customer").cloned(),
            user: headers.get("x-bf-user").cloned(),
            rejected: false,
            dropped_create: false,
            parent_request_id: None,
            headers,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn for_request(request: &NeutralRequest, headers: HashMap<String, String>) -> Self {
        Self::new(request.request_id, headers)
    }
}
