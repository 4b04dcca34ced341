//! Usage ledger - the append-only record of metered calls.
//!
//! [`record_usage`] is the only write path into `api_usage`. There is no update or
//! delete: summaries, quota checks and audits all recompute from these rows.
//!
//! Time ranges are half-open, `[start, end)`.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        period::PeriodType,
        usage::{ApiUsage, NewUsage, UsageTotals},
    },
};

const MAX_RECENT: i64 = 1000;

/// Append one usage event to the ledger.
///
/// Works on the pool or inside a caller's transaction:
///
/// ```rust,no_run
/// # use api_governance::{db::DbPool, models::usage::NewUsage, services::usage_service};
/// # async fn demo(pool: &DbPool, event: NewUsage) -> Result<(), api_governance::error::AppError> {
/// let mut tx = pool.begin().await?;
/// usage_service::record_usage(&mut *tx, event).await?;
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// - `InvalidRequest`: blank consumer, a negative/non-finite counter, or a blocked call with
///   non-zero consumption
/// - `Conflict`: the API does not exist or the supplied id is already used
pub async fn record_usage<'e, E>(executor: E, event: NewUsage) -> Result<ApiUsage, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    validate_event(&event)?;

    let usage = sqlx::query_as::<_, ApiUsage>(
        r#"
        INSERT INTO api_usage (
            id, api_id, consumer_id, timestamp, tokens_used, credits_used,
            execution_time_ms, endpoint, was_throttled, was_blocked
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(event.id.unwrap_or_else(Uuid::new_v4))
    .bind(event.api_id)
    .bind(event.consumer_id)
    .bind(event.timestamp.unwrap_or_else(Utc::now))
    .bind(event.tokens_used)
    .bind(event.credits_used)
    .bind(event.execution_time_ms)
    .bind(event.endpoint)
    .bind(event.was_throttled)
    .bind(event.was_blocked)
    .fetch_one(executor)
    .await
    .map_err(|e| AppError::from_constraint(e, "usage event"))?;

    tracing::debug!(usage_id = %usage.id, api_id = %usage.api_id, "usage recorded");
    Ok(usage)
}

/// Most recent usage rows for (api, consumer), newest first.
pub async fn get_recent_usage(
    pool: &DbPool,
    api_id: Uuid,
    consumer_id: &str,
    limit: i64,
) -> Result<Vec<ApiUsage>, AppError> {
    if limit <= 0 {
        return Err(AppError::InvalidRequest("limit must be positive".to_string()));
    }

    let rows = sqlx::query_as::<_, ApiUsage>(
        r#"
        SELECT * FROM api_usage
        WHERE api_id = $1 AND consumer_id = $2
        ORDER BY timestamp DESC, id ASC
        LIMIT $3
        "#,
    )
    .bind(api_id)
    .bind(consumer_id)
    .bind(limit.min(MAX_RECENT))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Usage rows for (api, consumer) in `[start, end)`, oldest first.
pub async fn get_usage_by_period(
    pool: &DbPool,
    api_id: Uuid,
    consumer_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<ApiUsage>, AppError> {
    validate_range(start, end)?;

    let rows = sqlx::query_as::<_, ApiUsage>(
        r#"
        SELECT * FROM api_usage
        WHERE api_id = $1 AND consumer_id = $2 AND timestamp >= $3 AND timestamp < $4
        ORDER BY timestamp ASC, id ASC
        "#,
    )
    .bind(api_id)
    .bind(consumer_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Totals for (api, consumer) in `[start, end)`. No rows yields zero totals, not an error.
pub async fn get_total_usage(
    pool: &DbPool,
    api_id: Uuid,
    consumer_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<UsageTotals, AppError> {
    validate_range(start, end)?;
    let mut conn = pool.acquire().await?;
    totals_between(&mut conn, api_id, consumer_id, start, end, false).await
}

/// Totals for (api, consumer) over the calendar day, week or month containing `now`.
pub async fn get_total_usage_for_period(
    pool: &DbPool,
    api_id: Uuid,
    consumer_id: &str,
    period_type: PeriodType,
    now: DateTime<Utc>,
) -> Result<UsageTotals, AppError> {
    let window = period_type.window(now);
    get_total_usage(pool, api_id, consumer_id, window.start, window.end).await
}

/// Sum the ledger for (api, consumer) in `[start, end)`.
///
/// With `admitted_only`, blocked calls are left out of the request count. They carry no
/// consumption, so token, credit and time sums match the unfiltered ledger.
pub(crate) async fn totals_between(
    conn: &mut SqliteConnection,
    api_id: Uuid,
    consumer_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    admitted_only: bool,
) -> Result<UsageTotals, AppError> {
    let totals = sqlx::query_as::<_, UsageTotals>(
        r#"
        SELECT
            COUNT(*) AS total_requests,
            COALESCE(SUM(tokens_used), 0) AS total_tokens,
            COALESCE(SUM(credits_used), 0.0) AS total_credits,
            COALESCE(SUM(execution_time_ms), 0) AS total_execution_time_ms,
            COALESCE(SUM(was_throttled), 0) AS throttled_requests,
            COALESCE(SUM(was_blocked), 0) AS blocked_requests
        FROM api_usage
        WHERE api_id = $1 AND consumer_id = $2
          AND timestamp >= $3 AND timestamp < $4
          AND ($5 = 0 OR was_blocked = 0)
        "#,
    )
    .bind(api_id)
    .bind(consumer_id)
    .bind(start)
    .bind(end)
    .bind(admitted_only)
    .fetch_one(&mut *conn)
    .await?;
    Ok(totals)
}

fn validate_event(event: &NewUsage) -> Result<(), AppError> {
    if event.consumer_id.trim().is_empty() {
        return Err(AppError::InvalidRequest("consumer_id is required".to_string()));
    }
    if event.tokens_used < 0 || event.execution_time_ms < 0 {
        return Err(AppError::InvalidRequest(
            "usage counters must be non-negative".to_string(),
        ));
    }
    if !event.credits_used.is_finite() || event.credits_used < 0.0 {
        return Err(AppError::InvalidRequest(
            "credits_used must be a non-negative number".to_string(),
        ));
    }
    if event.was_blocked
        && (event.tokens_used != 0 || event.credits_used != 0.0 || event.execution_time_ms != 0)
    {
        return Err(AppError::InvalidRequest(
            "a blocked call consumes nothing".to_string(),
        ));
    }
    Ok(())
}

fn validate_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), AppError> {
    if start >= end {
        return Err(AppError::InvalidRequest(
            "period start must precede period end".to_string(),
        ));
    }
    Ok(())
}
