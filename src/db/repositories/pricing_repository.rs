use crate::error::AppError;
use crate::models::pricing::{PricingMode, PricingRow};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// Persistence for the pricing catalog and its sync marker. Same
/// runtime-checked query shape as `LogRepository`.
pub struct PricingRepository {
    pool: PgPool,
}

impl PricingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn load_rows(&self) -> Result<Vec<PricingRow>, AppError> {
        let rows = sqlx::query(
            "SELECT provider, model, mode, input_cost_per_token, output_cost_per_token, \
             input_cost_per_token_above_128k_tokens, output_cost_per_token_above_128k_tokens, \
             cache_read_input_token_cost, cache_write_input_token_cost, \
             input_cost_per_token_batches, output_cost_per_token_batches, \
             input_cost_per_second, input_cost_per_image FROM pricing_rows",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_pricing_row).collect()
    }

    /// Replaces the whole table in one transaction, mirroring how the
    /// in-memory catalog is itself replaced wholesale on refresh rather than
    /// patched row by row.
    pub async fn replace_all(&self, rows: &[PricingRow]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM pricing_rows").execute(&mut *tx).await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO pricing_rows (provider, model, mode, input_cost_per_token, output_cost_per_token, \
                 input_cost_per_token_above_128k_tokens, output_cost_per_token_above_128k_tokens, \
                 cache_read_input_token_cost, cache_write_input_token_cost, \
                 input_cost_per_token_batches, output_cost_per_token_batches, \
                 input_cost_per_second, input_cost_per_image) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .bind(&row.provider)
            .bind(&row.model)
            .bind(format!("{:?}", row.mode))
            .bind(&row.input_cost_per_token)
            .bind(&row.output_cost_per_token)
            .bind(&row.input_cost_per_token_above_128k_tokens)
            .bind(&row.output_cost_per_token_above_128k_tokens)
            .bind(&row.cache_read_input_token_cost)
            .bind(&row.cache_write_input_token_cost)
            .bind(&row.input_cost_per_token_batches)
            .bind(&row.output_cost_per_token_batches)
            .bind(&row.input_cost_per_second)
            .bind(&row.input_cost_per_image)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn load_last_sync(&self) -> Result<Option<DateTime<Utc>>, AppError> {
        let row = sqlx::query("SELECT last_sync FROM pricing_sync_marker WHERE id = TRUE")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("last_sync")?)),
            None => Ok(None),
        }
    }

    pub async fn save_last_sync(&self, when: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO pricing_sync_marker (id, last_sync) VALUES (TRUE, $1) \
             ON CONFLICT (id) DO UPDATE SET last_sync = EXCLUDED.last_sync",
        )
        .bind(when)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_pricing_row(row: PgRow) -> Result<PricingRow, AppError> {
    let mode_str: String = row.try_get("mode")?;
    Ok(PricingRow {
        provider: row.try_get("provider")?,
        model: row.try_get("model")?,
        mode: parse_mode(&mode_str)?,
        input_cost_per_token: row.try_get("input_cost_per_token")?,
        output_cost_per_token: row.try_get("output_cost_per_token")?,
        input_cost_per_token_above_128k_tokens: row.try_get("input_cost_per_token_above_128k_tokens")?,
        output_cost_per_token_above_128k_tokens: row.try_get("output_cost_per_token_above_128k_tokens")?,
        cache_read_input_token_cost: row.try_get("cache_read_input_token_cost")?,
        cache_write_input_token_cost: row.try_get("cache_write_input_token_cost")?,
        input_cost_per_token_batches: row.try_get("input_cost_per_token_batches")?,
        output_cost_per_token_batches: row.try_get("output_cost_per_token_batches")?,
        input_cost_per_second: row.try_get("input_cost_per_second")?,
        input_cost_per_image: row.try_get("input_cost_per_image")?,
    })
}

fn parse_mode(s: &str) -> Result<PricingMode, AppError> {
    match s {
        "Chat" => Ok(PricingMode::Chat),
        "Completion" => Ok(PricingMode::Completion),
        "Responses" => Ok(PricingMode::Responses),
        "Embedding" => Ok(PricingMode::Embedding),
        "AudioSpeech" => Ok(PricingMode::AudioSpeech),
        "AudioTranscription" => Ok(PricingMode::AudioTranscription),
        other => Err(AppError::Internal(format!("unknown pricing mode '{other}' in configuration store"))),
    }
}
