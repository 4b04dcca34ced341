//! Aggregation engine - folds the usage ledger into daily/weekly/monthly summaries.
//!
//! # Algorithm
//!
//! For every API known to the store, and for each of the current day, week (Monday start) and
//! month in UTC:
//!
//! 1. Group that API's ledger rows in the window by consumer and sum the counters.
//! 2. Upsert one summary row per consumer keyed by (api, consumer, period_type, period_start).
//!
//! # Idempotence
//!
//! The upsert overwrites aggregates with a fresh recomputation instead of incrementing them, so
//! re-running the refresh, or two refreshes racing on the same key, converge on the same row.
//! Each API is refreshed in its own transaction: a crash leaves some summaries stale, never
//! half-written, and the next run heals them.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        period::{PeriodType, Window},
        summary::{ApiUsageSummary, RefreshReport, SummaryFilter},
    },
};

/// Per-consumer sums of one window.
#[derive(Debug, sqlx::FromRow)]
struct ConsumerTotals {
    consumer_id: String,
    total_requests: i64,
    total_tokens: i64,
    total_credits: f64,
    total_execution_time_ms: i64,
    throttled_requests: i64,
    blocked_requests: i64,
}

/// Recompute every summary for the windows containing the current time.
///
/// This is the periodic entry point.
pub async fn refresh_summaries(pool: &DbPool) -> Result<RefreshReport, AppError> {
    refresh_summaries_at(pool, Utc::now()).await
}

/// Recompute every summary for the windows containing `now`.
///
/// A failure on one API is logged and counted; the run moves on to the next API and the failed
/// one is retried on the next invocation.
///
/// # Errors
///
/// Only the initial API listing can fail the whole run.
#[tracing::instrument(skip(pool))]
pub async fn refresh_summaries_at(
    pool: &DbPool,
    now: DateTime<Utc>,
) -> Result<RefreshReport, AppError> {
    let api_ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM apis ORDER BY created_at, id")
        .fetch_all(pool)
        .await?;

    let mut report = RefreshReport::default();
    for api_id in api_ids {
        match refresh_api(pool, api_id, now).await {
            Ok(rows) => {
                report.apis_refreshed += 1;
                report.rows_upserted += rows;
            }
            Err(err) => {
                report.apis_failed += 1;
                tracing::error!(%api_id, error = %err, "summary refresh failed; will retry next run");
            }
        }
    }

    tracing::info!(
        apis = report.apis_refreshed,
        failed = report.apis_failed,
        rows = report.rows_upserted,
        "usage summaries refreshed"
    );
    Ok(report)
}

/// Recompute the day, week and month summaries of one API in a single transaction.
///
/// Returns the number of summary rows written.
pub async fn refresh_api(pool: &DbPool, api_id: Uuid, now: DateTime<Utc>) -> Result<usize, AppError> {
    let mut tx = pool.begin().await?;

    let mut written = 0;
    for period_type in PeriodType::ALL {
        let window = period_type.window(now);
        let totals = window_totals(&mut tx, api_id, window).await?;
        for consumer in &totals {
            upsert_summary(&mut tx, api_id, period_type, window, consumer, now).await?;
        }
        written += totals.len();
    }

    tx.commit().await?;
    Ok(written)
}

/// Read cached summaries of one API, optionally narrowed by consumer, period type and a
/// `[from, to)` range on `period_start`. Ordered by period start, then type and consumer.
pub async fn get_summaries(
    pool: &DbPool,
    filter: SummaryFilter,
) -> Result<Vec<ApiUsageSummary>, AppError> {
    let mut query =
        QueryBuilder::<Sqlite>::new("SELECT * FROM api_usage_summaries WHERE api_id = ");
    query.push_bind(filter.api_id);
    if let Some(consumer_id) = filter.consumer_id {
        query.push(" AND consumer_id = ").push_bind(consumer_id);
    }
    if let Some(period_type) = filter.period_type {
        query.push(" AND period_type = ").push_bind(period_type);
    }
    if let Some(from) = filter.from {
        query.push(" AND period_start >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        query.push(" AND period_start < ").push_bind(to);
    }
    query.push(" ORDER BY period_start ASC, period_type ASC, consumer_id ASC");

    let summaries = query
        .build_query_as::<ApiUsageSummary>()
        .fetch_all(pool)
        .await?;
    Ok(summaries)
}

/// The cached summary for one (api, consumer, period_type) bucket containing `now`.
pub(crate) async fn current_summary(
    conn: &mut SqliteConnection,
    api_id: Uuid,
    consumer_id: &str,
    period_type: PeriodType,
    now: DateTime<Utc>,
) -> Result<Option<ApiUsageSummary>, AppError> {
    let window = period_type.window(now);
    let summary = sqlx::query_as::<_, ApiUsageSummary>(
        r#"
        SELECT * FROM api_usage_summaries
        WHERE api_id = $1 AND consumer_id = $2 AND period_type = $3 AND period_start = $4
        "#,
    )
    .bind(api_id)
    .bind(consumer_id)
    .bind(period_type)
    .bind(window.start)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(summary)
}

async fn window_totals(
    conn: &mut SqliteConnection,
    api_id: Uuid,
    window: Window,
) -> Result<Vec<ConsumerTotals>, AppError> {
    let totals = sqlx::query_as::<_, ConsumerTotals>(
        r#"
        SELECT
            consumer_id,
            COUNT(*) AS total_requests,
            COALESCE(SUM(tokens_used), 0) AS total_tokens,
            COALESCE(SUM(credits_used), 0.0) AS total_credits,
            COALESCE(SUM(execution_time_ms), 0) AS total_execution_time_ms,
            COALESCE(SUM(was_throttled), 0) AS throttled_requests,
            COALESCE(SUM(was_blocked), 0) AS blocked_requests
        FROM api_usage
        WHERE api_id = $1 AND timestamp >= $2 AND timestamp < $3
        GROUP BY consumer_id
        ORDER BY consumer_id
        "#,
    )
    .bind(api_id)
    .bind(window.start)
    .bind(window.end)
    .fetch_all(&mut *conn)
    .await?;
    Ok(totals)
}

async fn upsert_summary(
    conn: &mut SqliteConnection,
    api_id: Uuid,
    period_type: PeriodType,
    window: Window,
    totals: &ConsumerTotals,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO api_usage_summaries (
            id, api_id, consumer_id, period_type, period_start, period_end,
            total_requests, total_tokens, total_credits, total_execution_time_ms,
            throttled_requests, blocked_requests, last_updated
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (api_id, consumer_id, period_type, period_start) DO UPDATE
        SET period_end = excluded.period_end,
            total_requests = excluded.total_requests,
            total_tokens = excluded.total_tokens,
            total_credits = excluded.total_credits,
            total_execution_time_ms = excluded.total_execution_time_ms,
            throttled_requests = excluded.throttled_requests,
            blocked_requests = excluded.blocked_requests,
            last_updated = excluded.last_updated
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(api_id)
    .bind(&totals.consumer_id)
    .bind(period_type)
    .bind(window.start)
    .bind(window.end)
    .bind(totals.total_requests)
    .bind(totals.total_tokens)
    .bind(totals.total_credits)
    .bind(totals.total_execution_time_ms)
    .bind(totals.throttled_requests)
    .bind(totals.blocked_requests)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
