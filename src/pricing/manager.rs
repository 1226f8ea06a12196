use crate::db::repositories::pricing_repository::PricingRepository;
use crate::models::pricing::{PricingMode, PricingRow};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const REMOTE_FETCH_TIMEOUT_SECS: u64 = 30;
const REFRESH_CHECK_INTERVAL_SECS: u64 = 3600;
const STALE_AFTER_HOURS: i64 = 24;

/// In-memory `{(model, provider, mode) -> priceRow}` catalog, periodically
/// refreshed from a remote JSON datasheet. Reads and writes go through a
/// `DashMap`; a full refresh replaces the map wholesale rather than patching
/// entries in place, matching the "fully replaced on refresh" resource model.
pub struct PricingManager {
    catalog: DashMap<String, PricingRow>,
    last_sync: RwLock<Option<DateTime<Utc>>>,
    datasheet_url: String,
    http_client: reqwest::Client,
}

impl PricingManager {
    pub fn new(datasheet_url: impl Into<String>) -> Arc<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REMOTE_FETCH_TIMEOUT_SECS))
            .build()
            .expect("pricing http client builds");

        Arc::new(Self {
            catalog: DashMap::new(),
            last_sync: RwLock::new(None),
            datasheet_url: datasheet_url.into(),
            http_client,
        })
    }

    /// Loads rows previously persisted to the configuration store. Called
    /// once at startup before attempting a remote refresh.
    pub fn load_from_rows(&self, rows: Vec<PricingRow>) {
        for row in rows {
            self.catalog.insert(row.own_key(), row);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    pub async fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.read().await
    }

    /// Downloads the remote datasheet, deduplicates by composite key,
    /// replaces the in-memory table, and stamps `last_sync`. Persisting the
    /// `LastModelPricingSync` marker to the configuration store is the
    /// caller's responsibility (this type only owns the in-memory side).
    pub async fn refresh(&self) -> Result<usize, String> {
        let response = self
            .http_client
            .get(&self.datasheet_url)
            .send()
            .await
            .map_err(|e| format!("pricing datasheet fetch failed: {e}"))?;

        let rows: Vec<PricingRow> = response
            .json()
            .await
            .map_err(|e| format!("pricing datasheet parse failed: {e}"))?;

        let mut deduped: std::collections::HashMap<String, PricingRow> = std::collections::HashMap::new();
        for row in rows {
            deduped.insert(row.own_key(), row);
        }

        self.catalog.clear();
        let count = deduped.len();
        for (key, row) in deduped {
            self.catalog.insert(key, row);
        }

        *self.last_sync.write().await = Some(Utc::now());
        info!(rows = count, "pricing catalog refreshed");
        Ok(count)
    }

    /// Startup sequence: load persisted rows, then attempt a remote refresh.
    /// Remote failure with existing rows degrades to a warning; remote
    /// failure with an empty table is a startup error.
    pub async fn startup_refresh(&self, persisted_rows: Vec<PricingRow>) -> Result<(), String> {
        self.load_from_rows(persisted_rows);

        match self.refresh().await {
            Ok(_) => Ok(()),
            Err(e) if !self.is_empty() => {
                warn!(error = %e, "remote pricing refresh failed at startup, continuing with stored data");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "remote pricing refresh failed and no stored pricing rows exist");
                Err(format!("pricing catalog is empty and refresh failed: {e}"))
            }
        }
    }

    /// `(provider, model, mode)` lookup with the documented fallback rules,
    /// applied once each: gemini -> vertex, responses -> chat.
    pub fn lookup(&self, provider: &str, model: &str, mode: PricingMode) -> Option<PricingRow> {
        if let Some(row) = self.catalog.get(&PricingRow::key(provider, model, mode)) {
            return Some(row.clone());
        }

        if provider == "gemini" {
            if let Some(row) = self.catalog.get(&PricingRow::key("vertex", model, mode)) {
                return Some(row.clone());
            }
        }

        if mode == PricingMode::Responses {
            if let Some(row) = self.catalog.get(&PricingRow::key(provider, model, PricingMode::Chat)) {
                return Some(row.clone());
            }
        }

        debug!(provider, model, ?mode, "pricing row not found, falling back to zero cost");
        None
    }

    pub fn row_count(&self) -> usize {
        self.catalog.len()
    }

    /// All rows currently in the catalog, for persisting back to the
    /// configuration store after a refresh.
    pub fn snapshot(&self) -> Vec<PricingRow> {
        self.catalog.iter().map(|e| e.value().clone()).collect()
    }
}

/// Persists the current catalog and its sync marker — the store-side half of
/// a refresh; `refresh`/`startup_refresh` only own the in-memory side.
pub async fn persist_snapshot(manager: &PricingManager, repo: &PricingRepository) {
    if let Err(e) = repo.replace_all(&manager.snapshot()).await {
        error!(error = %e, "failed to persist pricing catalog");
        return;
    }
    if let Some(last_sync) = manager.last_sync().await {
        if let Err(e) = repo.save_last_sync(last_sync).await {
            error!(error = %e, "failed to persist pricing sync marker");
        }
    }
}

/// Wakes hourly and invokes a refresh only when `now - last_sync >= 24h`.
pub fn spawn_refresh_worker(manager: Arc<PricingManager>, repo: Arc<PricingRepository>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(REFRESH_CHECK_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let stale = match manager.last_sync().await {
                Some(last) => Utc::now() - last >= chrono::Duration::hours(STALE_AFTER_HOURS),
                None => true,
            };
            if stale {
                match manager.refresh().await {
                    Ok(_) => persist_snapshot(&manager, &repo).await,
                    Err(e) => error!(error = %e, "scheduled pricing refresh failed"),
                }
            }
        }
    })
}
