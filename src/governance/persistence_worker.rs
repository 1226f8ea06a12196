use crate::db::repositories::governance_repository::GovernanceRepository;
use crate::governance::store::GovernanceStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Periodically checkpoints budget and rate-limit usage counters to the
/// configuration store, off the request path, the same tradeoff
/// `LoggingPlugin` makes for its own writes. Without this, a restart would
/// reload budgets/rate limits at whatever usage was last persisted at
/// creation time and forgive everything accrued since.
pub fn spawn_checkpoint_worker(
    store: Arc<GovernanceStore>,
    repo: Arc<GovernanceRepository>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for id in store.all_budget_ids() {
                if let Some(budget) = store.get_budget(id) {
                    if let Err(e) = repo.upsert_budget(&budget).await {
                        warn!(error = %e, budget_id = %id, "governance checkpoint: budget persist failed");
                    }
                }
            }
            for id in store.all_rate_limit_ids() {
                if let Some(rate_limit) = store.get_rate_limit(id) {
                    if let Err(e) = repo.upsert_rate_limit(&rate_limit).await {
                        warn!(error = %e, rate_limit_id = %id, "governance checkpoint: rate limit persist failed");
                    }
                }
            }
        }
    })
}
