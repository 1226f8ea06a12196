use crate::error::AppError;
use crate::governance::store::GovernanceStore;
use crate::models::governance::{Budget, Customer, RateLimit, Team, VirtualKey};
use crate::models::plugin_config::PluginConfig;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// Persistence for the entities `GovernanceStore` holds in memory, plus
/// plugin configs. Same runtime-checked `sqlx::query`/`.bind()` shape as
/// `LogRepository`: no compile-time query macros, since there's no migrated
/// schema to check them against here.
pub struct GovernanceRepository {
    pool: PgPool,
}

impl GovernanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Rebuilds `store` from the configuration tables. Called once at
    /// startup, before the server accepts traffic.
    pub async fn load_into(&self, store: &GovernanceStore) -> Result<(), AppError> {
        for vk in self.list_virtual_keys().await? {
            store.upsert_virtual_key(vk);
        }
        for team in self.list_teams().await? {
            store.upsert_team(team);
        }
        for customer in self.list_customers().await? {
            store.upsert_customer(customer);
        }
        for budget in self.list_budgets().await? {
            store.upsert_budget(budget);
        }
        for rate_limit in self.list_rate_limits().await? {
            store.upsert_rate_limit(rate_limit);
        }
        Ok(())
    }

    pub async fn list_virtual_keys(&self) -> Result<Vec<VirtualKey>, AppError> {
        let rows = sqlx::query(
            "SELECT id, value, name, active, description, providers, upstream_credential_set, budget_id, rate_limit_id, owner \
             FROM virtual_keys",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_virtual_key).collect()
    }

    pub async fn upsert_virtual_key(&self, vk: &VirtualKey) -> Result<(), AppError> {
        let providers = serde_json::to_value(&vk.providers)?;
        let owner = serde_json::to_value(&vk.owner)?;
        sqlx::query(
            "INSERT INTO virtual_keys (id, value, name, active, description, providers, upstream_credential_set, budget_id, rate_limit_id, owner) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO UPDATE SET value = EXCLUDED.value, name = EXCLUDED.name, active = EXCLUDED.active, \
             description = EXCLUDED.description, providers = EXCLUDED.providers, \
             upstream_credential_set = EXCLUDED.upstream_credential_set, budget_id = EXCLUDED.budget_id, \
             rate_limit_id = EXCLUDED.rate_limit_id, owner = EXCLUDED.owner",
        )
        .bind(vk.id)
        .bind(&vk.value)
        .bind(&vk.name)
        .bind(vk.active)
        .bind(&vk.description)
        .bind(providers)
        .bind(&vk.upstream_credential_set)
        .bind(vk.budget_id)
        .bind(vk.rate_limit_id)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_virtual_key(&self, value: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM virtual_keys WHERE value = $1")
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_teams(&self) -> Result<Vec<Team>, AppError> {
        let rows = sqlx::query("SELECT id, name, customer_id, budget_id FROM teams")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                Ok::<_, AppError>(Team {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    customer_id: row.try_get("customer_id")?,
                    budget_id: row.try_get("budget_id")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn upsert_team(&self, team: &Team) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO teams (id, name, customer_id, budget_id) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, customer_id = EXCLUDED.customer_id, budget_id = EXCLUDED.budget_id",
        )
        .bind(team.id)
        .bind(&team.name)
        .bind(team.customer_id)
        .bind(team.budget_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_customers(&self) -> Result<Vec<Customer>, AppError> {
        let rows = sqlx::query("SELECT id, name, budget_id FROM customers")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                Ok::<_, AppError>(Customer {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    budget_id: row.try_get("budget_id")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn upsert_customer(&self, customer: &Customer) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO customers (id, name, budget_id) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, budget_id = EXCLUDED.budget_id",
        )
        .bind(customer.id)
        .bind(&customer.name)
        .bind(customer.budget_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_budgets(&self) -> Result<Vec<Budget>, AppError> {
        let rows = sqlx::query("SELECT id, max_limit, current_usage, last_reset, reset_duration FROM budgets")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                Ok::<_, AppError>(Budget {
                    id: row.try_get("id")?,
                    max_limit: row.try_get("max_limit")?,
                    current_usage: row.try_get("current_usage")?,
                    last_reset: row.try_get("last_reset")?,
                    reset_duration: row.try_get("reset_duration")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn upsert_budget(&self, budget: &Budget) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO budgets (id, max_limit, current_usage, last_reset, reset_duration) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET max_limit = EXCLUDED.max_limit, current_usage = EXCLUDED.current_usage, \
             last_reset = EXCLUDED.last_reset, reset_duration = EXCLUDED.reset_duration",
        )
        .bind(budget.id)
        .bind(&budget.max_limit)
        .bind(&budget.current_usage)
        .bind(budget.last_reset)
        .bind(&budget.reset_duration)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_rate_limits(&self) -> Result<Vec<RateLimit>, AppError> {
        let rows = sqlx::query("SELECT id, token_limit, request_limit FROM rate_limits")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_rate_limit).collect()
    }

    pub async fn upsert_rate_limit(&self, rate_limit: &RateLimit) -> Result<(), AppError> {
        let token_limit = rate_limit.token_limit.as_ref().map(serde_json::to_value).transpose()?;
        let request_limit = rate_limit.request_limit.as_ref().map(serde_json::to_value).transpose()?;
        sqlx::query(
            "INSERT INTO rate_limits (id, token_limit, request_limit) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET token_limit = EXCLUDED.token_limit, request_limit = EXCLUDED.request_limit",
        )
        .bind(rate_limit.id)
        .bind(token_limit)
        .bind(request_limit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_plugin_configs(&self) -> Result<Vec<PluginConfig>, AppError> {
        let rows = sqlx::query("SELECT name, enabled, settings FROM plugin_configs")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                Ok::<_, AppError>(PluginConfig {
                    name: row.try_get("name")?,
                    enabled: row.try_get("enabled")?,
                    settings: row.try_get("settings")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn upsert_plugin_config(&self, config: &PluginConfig) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO plugin_configs (name, enabled, settings) VALUES ($1, $2, $3) \
             ON CONFLICT (name) DO UPDATE SET enabled = EXCLUDED.enabled, settings = EXCLUDED.settings",
        )
        .bind(&config.name)
        .bind(config.enabled)
        .bind(&config.settings)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_virtual_key(row: PgRow) -> Result<VirtualKey, AppError> {
    let providers: Value = row.try_get("providers")?;
    let owner: Value = row.try_get("owner")?;
    Ok(VirtualKey {
        id: row.try_get("id")?,
        value: row.try_get("value")?,
        name: row.try_get("name")?,
        active: row.try_get("active")?,
        description: row.try_get("description")?,
        providers: serde_json::from_value(providers)?,
        upstream_credential_set: row.try_get("upstream_credential_set")?,
        budget_id: row.try_get("budget_id")?,
        rate_limit_id: row.try_get("rate_limit_id")?,
        owner: serde_json::from_value(owner)?,
    })
}

fn row_to_rate_limit(row: PgRow) -> Result<RateLimit, AppError> {
    let token_limit: Option<Value> = row.try_get("token_limit")?;
    let request_limit: Option<Value> = row.try_get("request_limit")?;
    Ok(RateLimit {
        id: row.try_get("id")?,
        token_limit: token_limit.map(serde_json::from_value).transpose()?,
        request_limit: request_limit.map(serde_json::from_value).transpose()?,
    })
}
