use crate::error::AppError;
use crate::governance::resolver::{zero_cost, BudgetResolver};
use crate::governance::store::GovernanceStore;
use crate::governance::usage_tracker::UsageTracker;
use crate::governance::weighted_selection::{fallback_order, qualifying_providers, select_weighted};
use crate::models::governance::{EvaluationDecision, EvaluationRequest, ProviderAllowance, VirtualKey};
use crate::models::neutral::{NeutralRequest, NeutralResponse, RequestKind};
use crate::pipeline::context::RequestContext;
use crate::pipeline::plugin::{Plugin, PreHookOutcome};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Maps a denial from the resolver onto the wire-level error taxonomy.
/// `Allow` never reaches here; callers branch on `is_allowed()` first.
fn decision_to_app_error(decision: EvaluationDecision) -> AppError {
    match decision {
        EvaluationDecision::Allow => {
            AppError::Internal("evaluate() returned Allow on a denial path".to_string())
        }
        EvaluationDecision::VirtualKeyNotFound => AppError::VirtualKeyNotFound,
        EvaluationDecision::VirtualKeyBlocked => {
            AppError::VirtualKeyBlocked("virtual key is not active".to_string())
        }
        EvaluationDecision::ProviderBlocked => {
            AppError::ProviderBlocked("provider not in virtual key's allowed set".to_string())
        }
        EvaluationDecision::ModelBlocked => {
            AppError::ModelBlocked("model not in provider's allowed-models list".to_string())
        }
        EvaluationDecision::RateLimited(reason) => AppError::RateLimited(reason),
        EvaluationDecision::TokenLimited => {
            AppError::TokenLimited("token rate limit exceeded".to_string())
        }
        EvaluationDecision::RequestLimited => {
            AppError::RequestLimited("request rate limit exceeded".to_string())
        }
        EvaluationDecision::BudgetExceeded(reason) => AppError::BudgetExceeded(reason),
    }
}

fn denial_response(request_id: Uuid, kind: RequestKind, err: &AppError) -> NeutralResponse {
    NeutralResponse::non_stream(request_id, kind, json!({ "error": { "message": err.to_string() } }))
}

/// Admission control and weighted provider routing, grounded on the
/// governance subsystem (store, resolver, weighted selection, usage
/// tracker). Registered first in the chain, so its PreHook decides before
/// any other plugin sees the request and its PostHook runs last, reading
/// whatever cost the logging plugin has already attached to the response.
pub struct GovernancePlugin {
    store: Arc<GovernanceStore>,
    resolver: BudgetResolver,
    usage_tracker: UsageTracker,
    allow_direct_keys: bool,
    pending: DashMap<Uuid, VirtualKey>,
}

impl GovernancePlugin {
    pub fn new(store: Arc<GovernanceStore>, allow_direct_keys: bool) -> Arc<Self> {
        Arc::new(Self {
            resolver: BudgetResolver::new(store.clone()),
            usage_tracker: UsageTracker::new(store.clone()),
            store,
            allow_direct_keys,
            pending: DashMap::new(),
        })
    }
}

#[async_trait]
impl Plugin for GovernancePlugin {
    fn name(&self) -> &'static str {
        "governance"
    }

    /// When a VK is present and `model` is unprefixed, rewrites it to
    /// `selected-provider/model` by weighted draw over the VK's qualifying
    /// providers, and populates `fallbacks` with the rest in descending
    /// weight order if the caller didn't already set one.
    async fn transport_interceptor(
        &self,
        _url: &str,
        headers: HashMap<String, String>,
        mut body: Value,
    ) -> Result<(HashMap<String, String>, Value), AppError> {
        let Some(vk_value) = headers.get("x-bf-vk") else {
            return Ok((headers, body));
        };
        let Some(vk) = self.store.get_virtual_key(vk_value) else {
            return Ok((headers, body));
        };
        let Some(model) = body
            .get("model")
            .and_then(|m| m.as_str())
            .map(str::to_string)
        else {
            return Ok((headers, body));
        };
        if model.contains('/') {
            return Ok((headers, body));
        }

        let qualifying = qualifying_providers(&vk.providers, &model);
        if qualifying.is_empty() {
            return Ok((headers, body));
        }

        let owned: Vec<ProviderAllowance> = qualifying.iter().map(|p| (*p).clone()).collect();
        let Some(selected) = select_weighted(&owned) else {
            return Ok((headers, body));
        };

        if let Some(obj) = body.as_object_mut() {
            obj.insert(
                "model".to_string(),
                Value::String(format!("{}/{}", selected.provider, model)),
            );
            if !obj.contains_key("fallbacks") && qualifying.len() > 1 {
                let fallbacks = fallback_order(&qualifying, selected);
                let list: Vec<Value> = fallbacks
                    .iter()
                    .map(|p| Value::String(format!("{}/{}", p.provider, model)))
                    .collect();
                obj.insert("fallbacks".to_string(), Value::Array(list));
            }
        }

        Ok((headers, body))
    }

    async fn pre_hook(
        &self,
        ctx: &mut RequestContext,
        request: NeutralRequest,
    ) -> Result<PreHookOutcome, AppError> {
        let Some(vk_value) = ctx.vk_value.clone() else {
            if self.allow_direct_keys {
                return Ok(PreHookOutcome::Continue(request));
            }
            ctx.rejected = true;
            return Ok(PreHookOutcome::ShortCircuit(denial_response(
                ctx.request_id,
                request.kind,
                &AppError::VirtualKeyRequired,
            )));
        };

        let eval_request = EvaluationRequest {
            vk_value,
            provider: request.provider.clone(),
            model: request.model.clone(),
            request_id: ctx.request_id,
        };
        let result = self.resolver.evaluate(&eval_request, &zero_cost());

        if !result.is_allowed() {
            ctx.rejected = true;
            let err = decision_to_app_error(result.decision);
            return Ok(PreHookOutcome::ShortCircuit(denial_response(
                ctx.request_id,
                request.kind,
                &err,
            )));
        }

        let Some(vk) = self.store.get_virtual_key(&eval_request.vk_value) else {
            // Deleted between evaluate() and this lookup.
            ctx.rejected = true;
            return Ok(PreHookOutcome::ShortCircuit(denial_response(
                ctx.request_id,
                request.kind,
                &AppError::VirtualKeyNotFound,
            )));
        };

        self.pending.insert(ctx.request_id, vk);

        let mut request = request;
        if request.upstream_credential.is_none() {
            request.upstream_credential = result.allowed_credentials.into_iter().next();
        }
        Ok(PreHookOutcome::Continue(request))
    }

    /// For streaming, only the final chunk updates counters, and only when
    /// it carries usage does the token counter or budget move; the request
    /// counter always moves on whichever call this is (the `UsageTracker`
    /// itself is the thing that gates token/budget on `usage`/`cost` being
    /// present, so a single call per terminal event is enough here).
    async fn post_hook(
        &self,
        ctx: &mut RequestContext,
        response: Option<NeutralResponse>,
        error: Option<&AppError>,
    ) -> (Option<NeutralResponse>, Option<AppError>) {
        let Some(vk) = self.pending.get(&ctx.request_id).map(|r| r.clone()) else {
            return (response, None);
        };

        if error.is_some() {
            self.pending.remove(&ctx.request_id);
            return (response, None);
        }

        let Some(resp) = response.as_ref() else {
            return (response, None);
        };

        let is_stream_chunk = resp.delta.is_some();
        if is_stream_chunk {
            if resp.is_final {
                self.pending.remove(&ctx.request_id);
                self.usage_tracker.record(&vk, resp.usage.as_ref(), resp.cost.as_ref());
            }
        } else {
            self.pending.remove(&ctx.request_id);
            self.usage_tracker.record(&vk, resp.usage.as_ref(), resp.cost.as_ref());
        }

        (response, None)
    }

    async fn cleanup(&self, ctx: &RequestContext) {
        self.pending.remove(&ctx.request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::governance::{Budget, OwnerRef, RateLimit, SlidingCounter};
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use std::str::FromStr;

    fn vk_with_rate_limit(value: &str, rate_limit_id: Uuid) -> VirtualKey {
        VirtualKey {
            id: Uuid::new_v4(),
            value: value.to_string(),
            name: "test".to_string(),
            active: true,
            description: None,
            providers: vec![],
            upstream_credential_set: None,
            budget_id: None,
            rate_limit_id: Some(rate_limit_id),
            owner: OwnerRef::None,
        }
    }

    #[tokio::test]
    async fn missing_vk_is_rejected_unless_direct_keys_allowed() {
        let store = GovernanceStore::new();
        let plugin = GovernancePlugin::new(store, false);
        let mut ctx = RequestContext::new(Uuid::new_v4(), HashMap::new());
        let request = NeutralRequest::new(RequestKind::ChatCompletion, "openai", "gpt-4o", json!({}));

        match plugin.pre_hook(&mut ctx, request).await.unwrap() {
            PreHookOutcome::ShortCircuit(_) => {}
            PreHookOutcome::Continue(_) => panic!("expected short-circuit"),
        }
    }

    #[tokio::test]
    async fn allowed_request_populates_pending_and_credential() {
        let store = GovernanceStore::new();
        store.upsert_virtual_key(VirtualKey {
            id: Uuid::new_v4(),
            value: "vk-1".to_string(),
            name: "test".to_string(),
            active: true,
            description: None,
            providers: vec![],
            upstream_credential_set: Some("cred-1".to_string()),
            budget_id: None,
            rate_limit_id: None,
            owner: OwnerRef::None,
        });
        let plugin = GovernancePlugin::new(store, false);

        let mut headers = HashMap::new();
        headers.insert("x-bf-vk".to_string(), "vk-1".to_string());
        let mut ctx = RequestContext::new(Uuid::new_v4(), headers);
        let request = NeutralRequest::new(RequestKind::ChatCompletion, "openai", "gpt-4o", json!({}));

        let outcome = plugin.pre_hook(&mut ctx, request).await.unwrap();
        match outcome {
            PreHookOutcome::Continue(req) => assert_eq!(req.upstream_credential.as_deref(), Some("cred-1")),
            PreHookOutcome::ShortCircuit(_) => panic!("expected continue"),
        }
        assert!(plugin.pending.contains_key(&ctx.request_id));
    }

    #[tokio::test]
    async fn rate_limited_vk_is_short_circuited() {
        let store = GovernanceStore::new();
        let rate_limit_id = Uuid::new_v4();
        store.upsert_rate_limit(RateLimit {
            id: rate_limit_id,
            token_limit: None,
            request_limit: Some(SlidingCounter {
                max_limit: 1,
                current_usage: 1,
                reset_duration: "1m".to_string(),
                last_reset: Utc::now(),
            }),
        });
        store.upsert_virtual_key(vk_with_rate_limit("vk-rl", rate_limit_id));
        let plugin = GovernancePlugin::new(store, false);

        let mut headers = HashMap::new();
        headers.insert("x-bf-vk".to_string(), "vk-rl".to_string());
        let mut ctx = RequestContext::new(Uuid::new_v4(), headers);
        let request = NeutralRequest::new(RequestKind::ChatCompletion, "openai", "gpt-4o", json!({}));

        match plugin.pre_hook(&mut ctx, request).await.unwrap() {
            PreHookOutcome::ShortCircuit(_) => {}
            PreHookOutcome::Continue(_) => panic!("expected short-circuit"),
        }
    }

    #[tokio::test]
    async fn post_hook_applies_usage_and_clears_pending() {
        let store = GovernanceStore::new();
        let budget_id = Uuid::new_v4();
        store.upsert_budget(Budget {
            id: budget_id,
            max_limit: BigDecimal::from_str("100.00").unwrap(),
            current_usage: BigDecimal::from_str("0.00").unwrap(),
            last_reset: Utc::now(),
            reset_duration: "1d".to_string(),
        });
        store.upsert_virtual_key(VirtualKey {
            id: Uuid::new_v4(),
            value: "vk-2".to_string(),
            name: "test".to_string(),
            active: true,
            description: None,
            providers: vec![],
            upstream_credential_set: None,
            budget_id: Some(budget_id),
            rate_limit_id: None,
            owner: OwnerRef::None,
        });
        let plugin = GovernancePlugin::new(store.clone(), false);

        let mut headers = HashMap::new();
        headers.insert("x-bf-vk".to_string(), "vk-2".to_string());
        let mut ctx = RequestContext::new(Uuid::new_v4(), headers);
        let request = NeutralRequest::new(RequestKind::ChatCompletion, "openai", "gpt-4o", json!({}));
        plugin.pre_hook(&mut ctx, request).await.unwrap();

        let response = NeutralResponse::non_stream(ctx.request_id, RequestKind::ChatCompletion, json!({}));
        let mut response = response;
        response.cost = Some(BigDecimal::from_str("2.50").unwrap());
        plugin.post_hook(&mut ctx, Some(response), None).await;

        assert!(!plugin.pending.contains_key(&ctx.request_id));
        let budget = store.get_budget(budget_id).unwrap();
        assert_eq!(budget.current_usage, BigDecimal::from_str("2.50").unwrap());
    }
}
