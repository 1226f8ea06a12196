use crate::config::settings::DatabaseConfig;
use crate::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, error, info};

/// Creates the single connection pool the gateway runs against. The log
/// repository and governance/pricing persistence all go through one pool
/// sized from `DatabaseConfig`; there is no per-request role switching here.
pub async fn create_pool(db: &DatabaseConfig) -> Result<PgPool, AppError> {
    info!(url = %redact_password(&db.url), "connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(db.initial_pool_size.max(1))
        .acquire_timeout(Duration::from_secs(10))
        .connect(&db.url)
        .await
        .map_err(|e| AppError::Configuration(format!("failed to connect to database: {e}")))?;
    Ok(pool)
}

fn redact_password(url: &str) -> String {
    match url.rsplit_once('@') {
        Some((_, host)) => format!("postgres://***@{host}"),
        None => "postgres://***".to_string(),
    }
}

/// Verifies the database connection by executing a simple query. Used at
/// startup so a misconfigured database fails loudly before the server binds.
pub async fn verify_connection(pool: &PgPool) -> Result<(), AppError> {
    sqlx::query_as::<_, (i32,)>("SELECT 1 as result")
        .fetch_optional(pool)
        .await
        .map(|_| {
            debug!("database connection verified");
        })
        .map_err(|e| {
            error!(error = %e, "database connection verification failed");
            AppError::Internal(format!("database error: {e}"))
        })?;

    Ok(())
}
