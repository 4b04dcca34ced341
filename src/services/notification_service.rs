//! Quota notifier - threshold notifications for consumers.
//!
//! [`check_quotas`] walks every active API bound to an active policy and compares each
//! consumer's usage in a rule's current window against the rule's limit:
//!
//! - usage ≥ 100% of the limit files `limit_reached`
//! - usage ≥ the warning threshold files `approaching_limit`
//!
//! Day, week and month rules read the summary cache. Minute, hour and year rules have no
//! summary bucket and read ledger totals directly.
//!
//! # De-duplication
//!
//! A crossing is identified by (api, consumer, type, rule, period_start). It is filed at most
//! once: creation checks for an existing row in the same transaction, and the partial unique
//! index `idx_quota_notifications_crossing` rejects a racing duplicate.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, error::ErrorKind};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        notification::{NewNotification, NotificationType, QuotaCheckReport, QuotaNotification},
        policy::PolicyRule,
        usage::UsageTotals,
    },
    services::{aggregation_service::current_summary, policy_service, usage_service},
};

const MAX_PAGE_SIZE: i64 = 200;

/// File a notification unless the same crossing was already filed.
///
/// Returns `None` when an equivalent notification exists.
pub async fn create_notification(
    pool: &DbPool,
    notification: NewNotification,
) -> Result<Option<QuotaNotification>, AppError> {
    let mut tx = pool.begin().await?;
    let created = insert_notification(&mut tx, notification).await?;
    tx.commit().await?;
    Ok(created)
}

/// Notifications of one consumer, newest first.
pub async fn get_user_notifications(
    pool: &DbPool,
    consumer_id: &str,
    unread_only: bool,
    limit: i64,
    offset: i64,
) -> Result<Vec<QuotaNotification>, AppError> {
    if limit <= 0 || offset < 0 {
        return Err(AppError::InvalidRequest(
            "limit must be positive and offset non-negative".to_string(),
        ));
    }

    let notifications = sqlx::query_as::<_, QuotaNotification>(
        r#"
        SELECT * FROM quota_notifications
        WHERE consumer_id = $1 AND ($2 = 0 OR is_read = 0)
        ORDER BY created_at DESC, id ASC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(consumer_id)
    .bind(unread_only)
    .bind(limit.min(MAX_PAGE_SIZE))
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(notifications)
}

/// Number of unread notifications of one consumer.
pub async fn count_unread(pool: &DbPool, consumer_id: &str) -> Result<i64, AppError> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM quota_notifications WHERE consumer_id = $1 AND is_read = 0",
    )
    .bind(consumer_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Mark a notification read. Irreversible; marking twice keeps the first `read_at`.
pub async fn mark_read(pool: &DbPool, notification_id: Uuid) -> Result<QuotaNotification, AppError> {
    sqlx::query_as::<_, QuotaNotification>(
        r#"
        UPDATE quota_notifications
        SET is_read = 1,
            read_at = COALESCE(read_at, $1)
        WHERE id = $2
        RETURNING *
        "#,
    )
    .bind(Utc::now())
    .bind(notification_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Notification"))
}

/// Compare current usage with every active rule and file threshold notifications.
pub async fn check_quotas(pool: &DbPool, warning_threshold: f64) -> Result<QuotaCheckReport, AppError> {
    check_quotas_at(pool, warning_threshold, Utc::now()).await
}

/// [`check_quotas`] evaluated at `now`.
///
/// Failures on one API are logged and the check moves on; the next run retries.
#[tracing::instrument(skip(pool))]
pub async fn check_quotas_at(
    pool: &DbPool,
    warning_threshold: f64,
    now: DateTime<Utc>,
) -> Result<QuotaCheckReport, AppError> {
    if !(warning_threshold > 0.0 && warning_threshold < 100.0) {
        return Err(AppError::InvalidRequest(
            "warning threshold must be between 0 and 100".to_string(),
        ));
    }

    let bound: Vec<(Uuid, Uuid)> = sqlx::query_as(
        r#"
        SELECT a.id, a.policy_id
        FROM apis a
        JOIN policies p ON p.id = a.policy_id
        WHERE a.is_active = 1 AND p.is_active = 1
        ORDER BY a.created_at, a.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut report = QuotaCheckReport::default();
    for (api_id, policy_id) in bound {
        // Candidates are collected first so no connection is held while filing
        let candidates = {
            let mut conn = pool.acquire().await?;
            match collect_crossings(&mut conn, api_id, policy_id, warning_threshold, now).await {
                Ok(found) => found,
                Err(err) => {
                    tracing::error!(%api_id, error = %err, "quota check failed; will retry next run");
                    continue;
                }
            }
        };

        report.rules_checked += candidates.rules_checked;
        for notification in candidates.crossings {
            match create_notification(pool, notification).await {
                Ok(Some(filed)) => {
                    report.notifications_filed += 1;
                    tracing::info!(
                        %api_id,
                        consumer = %filed.consumer_id,
                        kind = filed.notification_type.as_str(),
                        percent = filed.percentage_used,
                        "quota notification filed"
                    );
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(%api_id, error = %err, "failed to file quota notification");
                }
            }
        }
    }

    Ok(report)
}

struct Crossings {
    rules_checked: usize,
    crossings: Vec<NewNotification>,
}

async fn collect_crossings(
    conn: &mut SqliteConnection,
    api_id: Uuid,
    policy_id: Uuid,
    warning_threshold: f64,
    now: DateTime<Utc>,
) -> Result<Crossings, AppError> {
    let rules = policy_service::rules_for_policy(conn, policy_id).await?;
    let mut found = Crossings {
        rules_checked: rules.len(),
        crossings: Vec::new(),
    };

    for rule in &rules {
        let window = rule.period.window(now);
        let consumers: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT consumer_id FROM api_usage
            WHERE api_id = $1 AND timestamp >= $2 AND timestamp < $3
            ORDER BY consumer_id
            "#,
        )
        .bind(api_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&mut *conn)
        .await?;

        for consumer_id in consumers {
            let totals = rule_usage(conn, api_id, &consumer_id, rule, now).await?;
            let percent = totals.measure(rule.rule_type) / rule.limit_value * 100.0;

            let kind = if percent >= 100.0 {
                NotificationType::LimitReached
            } else if percent >= warning_threshold {
                NotificationType::ApproachingLimit
            } else {
                continue;
            };

            found.crossings.push(NewNotification {
                api_id,
                message: crossing_message(kind, rule, percent),
                consumer_id,
                notification_type: kind,
                rule_id: Some(rule.id),
                rule_type: Some(rule.rule_type),
                period_start: Some(window.start),
                percentage_used: percent,
            });
        }
    }

    Ok(found)
}

/// Usage measured against a rule: the summary bucket when one exists, otherwise the ledger.
async fn rule_usage(
    conn: &mut SqliteConnection,
    api_id: Uuid,
    consumer_id: &str,
    rule: &PolicyRule,
    now: DateTime<Utc>,
) -> Result<UsageTotals, AppError> {
    if let Some(period_type) = rule.period.summary_period() {
        if let Some(summary) = current_summary(conn, api_id, consumer_id, period_type, now).await? {
            return Ok(summary.totals());
        }
        tracing::debug!(%api_id, consumer = consumer_id, "no summary yet; reading ledger");
    }
    let window = rule.period.window(now);
    usage_service::totals_between(conn, api_id, consumer_id, window.start, window.end, true).await
}

fn crossing_message(kind: NotificationType, rule: &PolicyRule, percent: f64) -> String {
    match kind {
        NotificationType::LimitReached => format!(
            "{} limit of {} per {} reached ({:.1}% used)",
            rule.rule_type,
            rule.limit_value,
            rule.period.as_str(),
            percent
        ),
        _ => format!(
            "{:.1}% of the {} limit of {} per {} used",
            percent,
            rule.rule_type,
            rule.limit_value,
            rule.period.as_str()
        ),
    }
}

/// Insert a notification inside the caller's transaction, skipping duplicates of a crossing.
pub(crate) async fn insert_notification(
    conn: &mut SqliteConnection,
    notification: NewNotification,
) -> Result<Option<QuotaNotification>, AppError> {
    if let (Some(rule_id), Some(period_start)) = (notification.rule_id, notification.period_start)
    {
        let existing: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM quota_notifications
            WHERE api_id = $1 AND consumer_id = $2 AND notification_type = $3
              AND rule_id = $4 AND period_start = $5
            "#,
        )
        .bind(notification.api_id)
        .bind(&notification.consumer_id)
        .bind(notification.notification_type)
        .bind(rule_id)
        .bind(period_start)
        .fetch_optional(&mut *conn)
        .await?;

        if existing.is_some() {
            return Ok(None);
        }
    }

    let inserted = sqlx::query_as::<_, QuotaNotification>(
        r#"
        INSERT INTO quota_notifications (
            id, api_id, consumer_id, notification_type, rule_id, rule_type,
            period_start, percentage_used, message, is_read, read_at, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, NULL, $10)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(notification.api_id)
    .bind(notification.consumer_id)
    .bind(notification.notification_type)
    .bind(notification.rule_id)
    .bind(notification.rule_type)
    .bind(notification.period_start)
    .bind(notification.percentage_used)
    .bind(notification.message)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await;

    match inserted {
        Ok(row) => Ok(Some(row)),
        // A concurrent check filed the same crossing first
        Err(sqlx::Error::Database(ref db_err)) if db_err.kind() == ErrorKind::UniqueViolation => {
            Ok(None)
        }
        Err(err) => Err(AppError::from_constraint(err, "notification")),
    }
}
