use crate::governance::duration::parse_reset_duration;
use crate::governance::store::GovernanceStore;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Visits every rate-limit and budget; for each whose `now - last_reset >=
/// reset_duration`, zeroes `current_usage` and advances `last_reset`. Runs
/// once at startup (so downtime longer than a reset window resets cleanly)
/// and then on a one-minute interval, matching the cadence
/// `start_memory_store_cleanup_task` uses for rate-limit memory sweeps.
pub async fn run_reset_sweep(store: &Arc<GovernanceStore>, warned_durations: &Mutex<HashSet<String>>) {
    let now = Utc::now();

    for budget_id in store.all_budget_ids() {
        store.with_budget_mut(budget_id, |budget| {
            match parse_reset_duration(&budget.reset_duration) {
                Ok(window) => {
                    if now - budget.last_reset >= window {
                        budget.current_usage = bigdecimal::BigDecimal::from(0);
                        budget.last_reset = now;
                    }
                }
                Err(_) => warn_once(warned_durations, &budget.reset_duration),
            }
        });
    }

    for rate_limit_id in store.all_rate_limit_ids() {
        store.with_rate_limit_mut(rate_limit_id, |rl| {
            for counter in [rl.token_limit.as_mut(), rl.request_limit.as_mut()]
                .into_iter()
                .flatten()
            {
                match parse_reset_duration(&counter.reset_duration) {
                    Ok(window) => {
                        if now - counter.last_reset >= window {
                            counter.current_usage = 0;
                            counter.last_reset = now;
                        }
                    }
                    Err(_) => warn_once(warned_durations, &counter.reset_duration),
                }
            }
        });
    }

    debug!("governance reset sweep completed");
}

/// Surfaces one warning per distinct malformed reset-duration value per
/// process, per spec's boundary requirement.
fn warn_once(warned: &Mutex<HashSet<String>>, value: &str) {
    let mut guard = warned.lock().expect("warned-durations mutex poisoned");
    if guard.insert(value.to_string()) {
        warn!(duration = value, "malformed reset-duration, counter not reset");
    }
}

pub fn spawn_reset_worker(store: Arc<GovernanceStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let warned_durations = Mutex::new(HashSet::new());

        info!("running startup governance reset sweep");
        run_reset_sweep(&store, &warned_durations).await;

        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            run_reset_sweep(&store, &warned_durations).await;
        }
    })
}
