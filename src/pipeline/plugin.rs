use crate::error::AppError;
use crate::models::neutral::NeutralResponse;
use crate::models::neutral::NeutralRequest;
use crate::pipeline::context::RequestContext;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Result of a PreHook invocation: either the request continues (possibly
/// mutated), or it short-circuits with a response fed directly to the
/// PostHook chain.
pub enum PreHookOutcome {
    Continue(NeutralRequest),
    ShortCircuit(NeutralResponse),
}

/// A chain participant. Every method has a no-op default so a plugin only
/// overrides the stages it cares about, the way the teacher's middleware
/// `Transform`/`Service` pairs only implement the hooks they need.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs once per request before normalisation; may mutate headers and
    /// body (e.g. the governance plugin rewrites `model` and adds
    /// `fallbacks`).
    async fn transport_interceptor(
        &self,
        _url: &str,
        headers: HashMap<String, String>,
        body: Value,
    ) -> Result<(HashMap<String, String>, Value), AppError> {
        Ok((headers, body))
    }

    async fn pre_hook(
        &self,
        _ctx: &mut RequestContext,
        request: NeutralRequest,
    ) -> Result<PreHookOutcome, AppError> {
        Ok(PreHookOutcome::Continue(request))
    }

    /// Runs in reverse registration order regardless of whether the
    /// upstream was contacted. `error` carries the upstream/dispatch error,
    /// if any; plugins must not panic here as errors are logged and
    /// swallowed by the chain, never fatal.
    async fn post_hook(
        &self,
        _ctx: &mut RequestContext,
        response: Option<NeutralResponse>,
        error: Option<&AppError>,
    ) -> (Option<NeutralResponse>, Option<AppError>) {
        let _ = error;
        (response, None)
    }

    async fn cleanup(&self, _ctx: &RequestContext) {}
}
