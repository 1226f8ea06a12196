use crate::governance::store::GovernanceStore;
use crate::models::governance::VirtualKey;
use crate::models::neutral::TokenUsage;
use bigdecimal::BigDecimal;
use std::sync::Arc;
use tracing::warn;

/// Applies usage from a completed (or final-chunked) request to the rate
/// limits and budget chain a virtual key touches. For streaming requests,
/// callers only invoke this once, on the final chunk; intermediate chunks
/// update neither counters nor budgets.
pub struct UsageTracker {
    store: Arc<GovernanceStore>,
}

impl UsageTracker {
    pub fn new(store: Arc<GovernanceStore>) -> Self {
        Self { store }
    }

    pub fn record(&self, vk: &VirtualKey, usage: Option<&TokenUsage>, cost: Option<&BigDecimal>) {
        if let Some(rate_limit_id) = vk.rate_limit_id {
            self.store.with_rate_limit_mut(rate_limit_id, |rl| {
                if let (Some(counter), Some(usage)) = (rl.token_limit.as_mut(), usage) {
                    counter.current_usage += usage.total_tokens;
                }
                if let Some(counter) = rl.request_limit.as_mut() {
                    counter.current_usage += 1;
                }
            });
        }

        if let Some(cost) = cost {
            for budget_id in self.store.budget_chain(vk) {
                let applied = self.store.with_budget_mut(budget_id, |budget| {
                    budget.current_usage = &budget.current_usage + cost;
                });
                if applied.is_none() {
                    warn!(budget_id = %budget_id, "usage tracker: budget vanished mid-chain-walk");
                }
            }
        }
    }
}
