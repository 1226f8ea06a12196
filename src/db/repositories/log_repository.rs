use crate::db::pool_ext::AcquireRetry;
use crate::error::AppError;
use crate::models::log_entry::{LogEntry, LogStatus};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, QueryBuilder, Row};
use tracing::debug;
use uuid::Uuid;

/// Filters accepted by the admin log-tail read endpoint; all optional, AND'd
/// together when present.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub status: Option<LogStatus>,
    pub before: Option<DateTime<Utc>>,
}

/// Fields an UPDATE writes once a request (or its final stream chunk)
/// completes. Built by the logging plugin, persisted here.
#[derive(Debug, Clone, Default)]
pub struct LogUpdate {
    pub status: LogStatus,
    pub output_message: Option<Value>,
    pub embedding_output: Option<Value>,
    pub speech_output: Option<Value>,
    pub transcription_output: Option<Value>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub cost: Option<BigDecimal>,
    pub cache_debug: Option<Value>,
    pub error_details: Option<Value>,
    pub latency_ms: Option<i64>,
}

impl LogUpdate {
    /// Clears every field back to its default, for pool reuse.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Persists one row per request, mirroring the teacher's `api_usage`
/// create-then-update flow but keyed by request-id rather than a billing
/// account, and using runtime-checked queries (not the `query!` macro)
/// since this table has no compiled query cache to check against.
pub struct LogRepository {
    pool: PgPool,
}

impl LogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_processing(&self, entry: &LogEntry) -> Result<(), AppError> {
        let mut tx = AcquireRetry::begin_with_retry(&self.pool, 3, 100).await?;

        sqlx::query(
            r#"
            INSERT INTO log_entries (
                request_id, parent_request_id, status, created_at, updated_at,
                provider, model, input_history, parameters, tools, streaming
            )
            VALUES ($1, $2, $3, $4, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.request_id)
        .bind(entry.parent_request_id)
        .bind(entry.status)
        .bind(entry.created_at)
        .bind(&entry.provider)
        .bind(&entry.model)
        .bind(&entry.input_history)
        .bind(&entry.parameters)
        .bind(&entry.tools)
        .bind(entry.streaming)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Applies `update` to the row for `request_id`. Returns `false` (rather
    /// than an error) when no row matched yet, so the caller can retry
    /// against the async create's race without treating it as fatal.
    pub async fn apply_update(&self, request_id: Uuid, update: &LogUpdate) -> Result<bool, AppError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE log_entries
            SET status = $1,
                updated_at = $2,
                output_message = $3,
                embedding_output = $4,
                speech_output = $5,
                transcription_output = $6,
                prompt_tokens = $7,
                completion_tokens = $8,
                total_tokens = $9,
                cost = $10,
                cache_debug = $11,
                error_details = $12,
                latency_ms = $13
            WHERE request_id = $14
            "#,
        )
        .bind(update.status)
        .bind(now)
        .bind(&update.output_message)
        .bind(&update.embedding_output)
        .bind(&update.speech_output)
        .bind(&update.transcription_output)
        .bind(update.prompt_tokens)
        .bind(update.completion_tokens)
        .bind(update.total_tokens)
        .bind(&update.cost)
        .bind(&update.cache_debug)
        .bind(&update.error_details)
        .bind(update.latency_ms)
        .bind(request_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Updates with up to three retries at one-second intervals, absorbing
    /// the race between the async `insert_processing` create and this
    /// update when they land on different pool connections.
    pub async fn apply_update_with_retry(&self, request_id: Uuid, update: &LogUpdate) -> Result<(), AppError> {
        for attempt in 0..3 {
            if self.apply_update(request_id, update).await? {
                return Ok(());
            }
            if attempt < 2 {
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
        debug!(%request_id, "log row not visible after three retries, giving up");
        Ok(())
    }

    /// Removes rows still `processing` older than `cutoff`, presumed
    /// abandoned (client disconnected before any PostHook ran).
    pub async fn cleanup_abandoned(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM log_entries
            WHERE status = 'processing' AND created_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Filter+paginate read used by the admin log-tail surface. Ordered
    /// newest-first; `filter.before` is also how the caller pages backwards,
    /// passing the oldest `created_at` seen so far.
    pub async fn list_recent(&self, filter: &LogFilter, limit: i64) -> Result<Vec<LogEntry>, AppError> {
        let mut qb = QueryBuilder::new("SELECT * FROM log_entries WHERE 1 = 1");
        if let Some(provider) = &filter.provider {
            qb.push(" AND provider = ").push_bind(provider);
        }
        if let Some(model) = &filter.model {
            qb.push(" AND model = ").push_bind(model);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status);
        }
        if let Some(before) = filter.before {
            qb.push(" AND created_at < ").push_bind(before);
        }
        qb.push(" ORDER BY created_at DESC LIMIT ").push_bind(limit.clamp(1, 500));

        let rows = qb.build_query_as::<LogEntry>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn count_processing_older_than(&self, cutoff: DateTime<Utc>) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM log_entries WHERE status = 'processing' AND created_at < $1")
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}
