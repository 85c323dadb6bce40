//! Persisted state (spec §6): `markets_current` (upserted, one row per
//! canonical market identity) and `markets_history` (append-only).
//!
//! Grounded on `pinnacle::db::PinnacleDbService::create_new_odds_entry`'s
//! upsert-on-conflict pattern, generalised to the
//! `(event, bookmaker, canonical_market_id, COALESCE(line, 0))` key spec §3/§4.D
//! requires, and extended with the separate append-only history table the
//! spec calls for (the teacher folds history into JSONB arrays on the current
//! row; this crate keeps them as genuinely separate, partition-friendly
//! tables, per spec §6).

use crate::error::AppError;
use crate::model::{HistoryPoint, WriteBatch};
use crate::write_pipeline::BatchCounts;
use chrono::NaiveDateTime;
use sqlx::PgPool;

/// Apply one batch atomically: all inserts/updates/availability changes for
/// this `(event, bookmaker)` commit together or none do.
pub async fn apply_batch(pool: &PgPool, batch: &WriteBatch) -> Result<BatchCounts, AppError> {
    let mut tx = pool.begin().await?;
    let mut counts = BatchCounts::default();

    for insert in &batch.inserts {
        upsert_current(&mut tx, &insert.market).await?;
        append_history(&mut tx, &insert.market.identity.event.to_string(), &insert.market, false).await?;
        counts.inserted += 1;
    }
    for update in &batch.updates {
        upsert_current(&mut tx, &update.market).await?;
        append_history(&mut tx, &update.market.identity.event.to_string(), &update.market, false).await?;
        counts.updated += 1;
    }
    for unavailable in &batch.unavailable {
        sqlx::query(
            r#"
            UPDATE markets_current
            SET unavailable_at = $5
            WHERE event_id = $1 AND bookmaker = $2 AND canonical_market_id = $3
              AND COALESCE(line, 0) = COALESCE($4, 0)
            "#,
        )
        .bind(unavailable.identity.event.0 as i64)
        .bind(unavailable.identity.bookmaker.slug())
        .bind(&unavailable.identity.canonical_market_id.0)
        .bind(unavailable.identity.line.0)
        .bind(unavailable.unavailable_at)
        .execute(&mut *tx)
        .await?;
        append_history(
            &mut tx,
            &unavailable.identity.event.to_string(),
            &unavailable.last_known,
            false,
        )
        .await?;
        counts.became_unavailable += 1;
    }
    for became in &batch.became_available {
        upsert_current(&mut tx, &became.market).await?;
        append_history(&mut tx, &became.market.identity.event.to_string(), &became.market, false).await?;
        counts.became_available += 1;
    }

    tx.commit().await?;
    Ok(counts)
}

async fn upsert_current(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, market: &crate::model::Market) -> Result<(), AppError> {
    let outcomes_json = serde_json::to_value(&market.outcomes)?;
    sqlx::query(
        r#"
        INSERT INTO markets_current (
            event_id, bookmaker, canonical_market_id, line,
            display_name, outcomes, margin, captured_at, last_confirmed_at, unavailable_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, $9)
        ON CONFLICT (event_id, bookmaker, canonical_market_id, (COALESCE(line, 0)))
        DO UPDATE SET
            display_name = EXCLUDED.display_name,
            outcomes = EXCLUDED.outcomes,
            margin = EXCLUDED.margin,
            last_confirmed_at = EXCLUDED.captured_at,
            unavailable_at = EXCLUDED.unavailable_at
        "#,
    )
    .bind(market.identity.event.0 as i64)
    .bind(market.identity.bookmaker.slug())
    .bind(&market.identity.canonical_market_id.0)
    .bind(market.identity.line.0)
    .bind(&market.display_name)
    .bind(outcomes_json)
    .bind(market.margin)
    .bind(chrono::Utc::now().naive_utc())
    .bind(market.unavailable_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn append_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    _event_id: &str,
    market: &crate::model::Market,
    confirmed: bool,
) -> Result<(), AppError> {
    let outcomes_json = serde_json::to_value(&market.outcomes)?;
    sqlx::query(
        r#"
        INSERT INTO markets_history (
            event_id, bookmaker, canonical_market_id, line,
            captured_at, confirmed, margin, outcomes, available
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(market.identity.event.0 as i64)
    .bind(market.identity.bookmaker.slug())
    .bind(&market.identity.canonical_market_id.0)
    .bind(market.identity.line.0)
    .bind(chrono::Utc::now().naive_utc())
    .bind(confirmed)
    .bind(market.margin)
    .bind(outcomes_json)
    .bind(market.unavailable_at.is_none())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Append-only confirmation rows (spec §4.C `confirm`): no change to
/// `markets_current`, one history row per confirmed market flagged as such.
pub async fn append_confirmations(pool: &PgPool, points: &[HistoryPoint]) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    for point in points {
        let outcomes_json = serde_json::to_value(&point.outcomes)?;
        sqlx::query(
            r#"
            INSERT INTO markets_history (
                event_id, bookmaker, canonical_market_id, line,
                captured_at, confirmed, margin, outcomes, available
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(point.identity.event.0 as i64)
        .bind(point.identity.bookmaker.slug())
        .bind(&point.identity.canonical_market_id.0)
        .bind(point.identity.line.0)
        .bind(point.captured_at)
        .bind(point.confirmed)
        .bind(point.margin)
        .bind(outcomes_json)
        .bind(point.available)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct OddsHistoryRow {
    pub captured_at: NaiveDateTime,
    pub outcomes: serde_json::Value,
    pub confirmed: bool,
    pub available: bool,
}

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct MarginHistoryRow {
    pub captured_at: NaiveDateTime,
    pub margin: f64,
}

/// `GET /history/odds` (spec §6): time series of odds observations for one
/// canonical market identity.
pub async fn fetch_odds_history(
    pool: &PgPool,
    event_id: u32,
    bookmaker: &str,
    canonical_market_id: &str,
    line: Option<f64>,
) -> Result<Vec<OddsHistoryRow>, AppError> {
    let rows = sqlx::query_as::<_, OddsHistoryRow>(
        r#"
        SELECT captured_at, outcomes, confirmed, available
        FROM markets_history
        WHERE event_id = $1 AND bookmaker = $2 AND canonical_market_id = $3
          AND COALESCE(line, 0) = COALESCE($4, 0)
        ORDER BY captured_at ASC
        "#,
    )
    .bind(event_id as i64)
    .bind(bookmaker)
    .bind(canonical_market_id)
    .bind(line)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// `GET /history/margin` (spec §6): time series of margins for one canonical
/// market identity.
pub async fn fetch_margin_history(
    pool: &PgPool,
    event_id: u32,
    bookmaker: &str,
    canonical_market_id: &str,
    line: Option<f64>,
) -> Result<Vec<MarginHistoryRow>, AppError> {
    let rows = sqlx::query_as::<_, MarginHistoryRow>(
        r#"
        SELECT captured_at, margin
        FROM markets_history
        WHERE event_id = $1 AND bookmaker = $2 AND canonical_market_id = $3
          AND COALESCE(line, 0) = COALESCE($4, 0)
        ORDER BY captured_at ASC
        "#,
    )
    .bind(event_id as i64)
    .bind(bookmaker)
    .bind(canonical_market_id)
    .bind(line)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Daily retention cleanup (spec §6 Retention, §4.H Scheduler): trim
/// `markets_history` rows older than `retention_days`.
pub async fn cleanup_history(pool: &PgPool, retention_days: i64) -> Result<u64, AppError> {
    let cutoff: NaiveDateTime = chrono::Utc::now().naive_utc() - chrono::Duration::days(retention_days);
    let result = sqlx::query("DELETE FROM markets_history WHERE captured_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
