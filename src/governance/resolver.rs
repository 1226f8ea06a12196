use crate::governance::store::GovernanceStore;
use crate::models::governance::{EvaluationDecision, EvaluationRequest, EvaluationResult};
use bigdecimal::{BigDecimal, Zero};
use std::sync::Arc;

/// Decision engine for admission: given an `EvaluationRequest`, walks the
/// fixed evaluation order from VK existence through the budget hierarchy.
pub struct BudgetResolver {
    store: Arc<GovernanceStore>,
}

impl BudgetResolver {
    pub fn new(store: Arc<GovernanceStore>) -> Self {
        Self { store }
    }

    pub fn evaluate(&self, req: &EvaluationRequest, projected_cost: &BigDecimal) -> EvaluationResult {
        let vk = match self.store.get_virtual_key(&req.vk_value) {
            Some(vk) => vk,
            None => return EvaluationResult::deny(EvaluationDecision::VirtualKeyNotFound),
        };

        if !vk.active {
            return EvaluationResult::deny(EvaluationDecision::VirtualKeyBlocked);
        }

        if !vk.provider_allowed(&req.provider) {
            return EvaluationResult::deny(EvaluationDecision::ProviderBlocked);
        }

        let allowance = vk.allowance_for(&req.provider);
        if let Some(allowance) = allowance {
            if !allowance.allows_model(&req.model) {
                return EvaluationResult::deny(EvaluationDecision::ModelBlocked);
            }
        }

        if let Some(rate_limit_id) = vk.rate_limit_id {
            if let Some(rate_limit) = self.store.get_rate_limit(rate_limit_id) {
                let token_exceeded = rate_limit
                    .token_limit
                    .as_ref()
                    .map(|c| c.is_exceeded())
                    .unwrap_or(false);
                let request_exceeded = rate_limit
                    .request_limit
                    .as_ref()
                    .map(|c| c.is_exceeded())
                    .unwrap_or(false);

                match (token_exceeded, request_exceeded) {
                    (true, true) => {
                        return EvaluationResult::deny(EvaluationDecision::RateLimited(
                            "token and request limits exceeded".to_string(),
                        ));
                    }
                    (true, false) => return EvaluationResult::deny(EvaluationDecision::TokenLimited),
                    (false, true) => return EvaluationResult::deny(EvaluationDecision::RequestLimited),
                    (false, false) => {}
                }
            }
        }

        let chain = self.store.budget_chain(&vk);
        let node_names = ["virtual key", "team", "customer"];
        for (i, budget_id) in chain.iter().enumerate() {
            if let Some(budget) = self.store.get_budget(*budget_id) {
                let projected_total = &budget.current_usage + projected_cost;
                if budget.is_exceeded() || projected_total > budget.max_limit {
                    let node = node_names.get(i).copied().unwrap_or("customer");
                    return EvaluationResult::deny(EvaluationDecision::BudgetExceeded(format!(
                        "budget exceeded at {node}: {}/{}",
                        projected_total, budget.max_limit
                    )));
                }
            }
        }

        let allowed_credentials = vk
            .upstream_credential_set
            .map(|c| vec![c])
            .unwrap_or_default();
        EvaluationResult::allow(allowed_credentials)
    }
}

/// Convenience for callers that only want an admission check with no cost
/// projected yet (e.g. a dry-run before the request body is fully parsed).
pub fn zero_cost() -> BigDecimal {
    BigDecimal::zero()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::governance::*;
    use chrono::Utc;
    use std::str::FromStr;
    use uuid::Uuid;

    fn make_vk(value: &str, budget_id: Option<Uuid>) -> VirtualKey {
        VirtualKey {
            id: Uuid::new_v4(),
            value: value.to_string(),
            name: "test".to_string(),
            active: true,
            description: None,
            providers: vec![],
            upstream_credential_set: None,
            budget_id,
            rate_limit_id: None,
            owner: OwnerRef::None,
        }
    }

    #[test]
    fn unknown_vk_is_denied() {
        let store = GovernanceStore::new();
        let resolver = BudgetResolver::new(store);
        let result = resolver.evaluate(
            &EvaluationRequest {
                vk_value: "missing".to_string(),
                provider: "openai".to_string(),
                model: "gpt-4o".to_string(),
                request_id: Uuid::new_v4(),
            },
            &BigDecimal::zero(),
        );
        assert_eq!(result.decision, EvaluationDecision::VirtualKeyNotFound);
    }

    #[test]
    fn budget_exceeded_reports_chain_node_and_totals() {
        let store = GovernanceStore::new();
        let budget_id = Uuid::new_v4();
        store.upsert_budget(Budget {
            id: budget_id,
            max_limit: BigDecimal::from_str("10.00").unwrap(),
            current_usage: BigDecimal::from_str("6.00").unwrap(),
            last_reset: Utc::now(),
            reset_duration: "1d".to_string(),
        });
        store.upsert_virtual_key(make_vk("vk-1", Some(budget_id)));

        let resolver = BudgetResolver::new(store);
        let result = resolver.evaluate(
            &EvaluationRequest {
                vk_value: "vk-1".to_string(),
                provider: "openai".to_string(),
                model: "gpt-4o".to_string(),
                request_id: Uuid::new_v4(),
            },
            &BigDecimal::from_str("6.00").unwrap(),
        );
        match result.decision {
            EvaluationDecision::BudgetExceeded(reason) => {
                assert!(reason.contains("virtual key"));
                assert!(reason.contains("12"));
            }
            other => panic!("expected BudgetExceeded, got {other:?}"),
        }
    }

    #[test]
    fn inactive_vk_is_blocked() {
        let store = GovernanceStore::new();
        let mut vk = make_vk("vk-2", None);
        vk.active = false;
        store.upsert_virtual_key(vk);

        let resolver = BudgetResolver::new(store);
        let result = resolver.evaluate(
            &EvaluationRequest {
                vk_value: "vk-2".to_string(),
                provider: "openai".to_string(),
                model: "gpt-4o".to_string(),
                request_id: Uuid::new_v4(),
            },
            &BigDecimal::zero(),
        );
        assert_eq!(result.decision, EvaluationDecision::VirtualKeyBlocked);
    }
}
