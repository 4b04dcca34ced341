//! Policy transition scheduler.
//!
//! A policy change is an append-only audit row. It is never marked applied; instead a change is
//! *pending* while it is the latest due change of its API and the API's live `policy_id` still
//! differs from its target. Applying is a conditional update on `apis`, so two schedulers racing
//! on the same change perform the transition once between them.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        access::AccessLevel,
        notification::NewNotification,
        policy_change::{PolicyChange, PolicyChangeRequest, RecordedChange, SchedulerReport},
    },
    services::{
        access_service::{grants_for_api, has_access},
        api_service::fetch_api,
        notification_service::insert_notification,
        policy_service::{fetch_policy, require_text},
    },
};

/// Record a policy change for an API.
///
/// The requester must own the API or hold an active admin grant on it. A change effective now
/// or in the past is applied in the same transaction.
///
/// # Errors
///
/// - `NotFound`: the API or the target policy does not exist
/// - `PermissionDenied`: the requester is neither owner nor admin
/// - `InvalidRequest`: inactive target policy, or a future change without a target
#[tracing::instrument(skip(pool, request), fields(api_id = %request.api_id, changed_by = %request.changed_by))]
pub async fn request_policy_change(
    pool: &DbPool,
    request: PolicyChangeRequest,
) -> Result<RecordedChange, AppError> {
    require_text(&request.changed_by, "changed_by")?;

    let now = Utc::now();
    let effective_date = request.effective_date.unwrap_or(now);
    let immediate = effective_date <= now;

    let mut tx = pool.begin().await?;

    let api = fetch_api(&mut tx, request.api_id)
        .await?
        .ok_or(AppError::NotFound("API"))?;

    if api.owner_id != request.changed_by
        && !has_access(&mut tx, api.id, &request.changed_by, AccessLevel::Admin).await?
    {
        return Err(AppError::PermissionDenied(format!(
            "{} may not change the policy of this API",
            request.changed_by
        )));
    }

    match request.new_policy_id {
        Some(policy_id) => {
            let policy = fetch_policy(&mut tx, policy_id)
                .await?
                .ok_or(AppError::NotFound("Policy"))?;
            if !policy.is_active {
                return Err(AppError::InvalidRequest(format!(
                    "policy '{}' is inactive",
                    policy.name
                )));
            }
        }
        None if !immediate => {
            return Err(AppError::InvalidRequest(
                "a scheduled change must name a target policy".to_string(),
            ));
        }
        None => {}
    }

    let change = sqlx::query_as::<_, PolicyChange>(
        r#"
        INSERT INTO policy_changes (id, api_id, old_policy_id, new_policy_id, changed_by, change_reason, effective_date, changed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(api.id)
    .bind(api.policy_id)
    .bind(request.new_policy_id)
    .bind(request.changed_by)
    .bind(request.change_reason)
    .bind(effective_date)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    let applied = if immediate {
        set_api_policy(&mut tx, &change, now).await?
    } else {
        false
    };

    tx.commit().await?;

    tracing::info!(change_id = %change.id, applied, "policy change recorded");
    Ok(RecordedChange { change, applied })
}

/// Audit trail of an API's policy changes, newest first.
pub async fn get_change_history(pool: &DbPool, api_id: Uuid) -> Result<Vec<PolicyChange>, AppError> {
    let changes = sqlx::query_as::<_, PolicyChange>(
        r#"
        SELECT * FROM policy_changes
        WHERE api_id = $1
        ORDER BY changed_at DESC, effective_date DESC, id ASC
        "#,
    )
    .bind(api_id)
    .fetch_all(pool)
    .await?;
    Ok(changes)
}

/// Due changes whose target is not yet live.
pub async fn get_pending_changes(pool: &DbPool) -> Result<Vec<PolicyChange>, AppError> {
    get_pending_changes_at(pool, Utc::now()).await
}

/// [`get_pending_changes`] evaluated at `now`.
///
/// Only the latest due change per API is considered; an older due change is superseded.
pub async fn get_pending_changes_at(
    pool: &DbPool,
    now: DateTime<Utc>,
) -> Result<Vec<PolicyChange>, AppError> {
    let mut conn = pool.acquire().await?;
    pending_changes(&mut conn, now, None).await
}

/// Apply a due change as of now.
///
/// Returns `true` when this call moved the API to the new policy. It returns `false` when the
/// change is no longer pending: the API is already on the target, a later due change superseded
/// it, or it is not due yet. Active consumers receive a `policy_changed` notification only in
/// the first case.
///
/// # Errors
///
/// - `InvalidRequest`: the change has no target policy
/// - `NotFound`: the API no longer exists
pub async fn apply_pending_change(pool: &DbPool, change: &PolicyChange) -> Result<bool, AppError> {
    apply_pending_change_at(pool, change, Utc::now()).await
}

/// [`apply_pending_change`] evaluated at `now`.
#[tracing::instrument(skip(pool, change), fields(change_id = %change.id, api_id = %change.api_id))]
pub async fn apply_pending_change_at(
    pool: &DbPool,
    change: &PolicyChange,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    if change.new_policy_id.is_none() {
        return Err(AppError::InvalidRequest(
            "policy change has no target policy".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    if fetch_api(&mut tx, change.api_id).await?.is_none() {
        return Err(AppError::NotFound("API"));
    }

    // Re-read under the write transaction; the caller's copy may be stale.
    let Some(current) = pending_changes(&mut tx, now, Some(change.id)).await?.pop() else {
        tracing::debug!("policy change no longer pending");
        return Ok(false);
    };

    let applied = set_api_policy(&mut tx, &current, now).await?;
    tx.commit().await?;

    if applied {
        tracing::info!("policy change applied");
    } else {
        tracing::debug!("policy change already in effect");
    }
    Ok(applied)
}

/// Scheduler tick: apply every pending change as of now.
pub async fn process_due_changes(pool: &DbPool) -> Result<SchedulerReport, AppError> {
    process_due_changes_at(pool, Utc::now()).await
}

/// [`process_due_changes`] evaluated at `now`. A failing change is logged and retried next tick.
#[tracing::instrument(skip(pool))]
pub async fn process_due_changes_at(
    pool: &DbPool,
    now: DateTime<Utc>,
) -> Result<SchedulerReport, AppError> {
    let pending = get_pending_changes_at(pool, now).await?;

    let mut report = SchedulerReport {
        pending: pending.len(),
        ..Default::default()
    };
    for change in &pending {
        match apply_pending_change_at(pool, change, now).await {
            Ok(true) => report.applied += 1,
            Ok(false) => {}
            Err(err) => {
                report.failed += 1;
                tracing::error!(change_id = %change.id, error = %err, "failed to apply policy change");
            }
        }
    }

    if report.pending > 0 {
        tracing::info!(
            pending = report.pending,
            applied = report.applied,
            failed = report.failed,
            "scheduled policy changes processed"
        );
    }
    Ok(report)
}

/// Number of pending changes, for health reporting.
pub async fn count_pending_changes(pool: &DbPool) -> Result<usize, AppError> {
    Ok(get_pending_changes(pool).await?.len())
}

/// Pending changes as of `now`, optionally narrowed to one change id.
async fn pending_changes(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
    only: Option<Uuid>,
) -> Result<Vec<PolicyChange>, AppError> {
    let changes = sqlx::query_as::<_, PolicyChange>(
        r#"
        SELECT pc.* FROM policy_changes pc
        JOIN apis a ON a.id = pc.api_id
        WHERE pc.effective_date <= $1
          AND pc.new_policy_id IS NOT NULL
          AND (a.policy_id IS NULL OR a.policy_id != pc.new_policy_id)
          AND pc.id = (
              SELECT latest.id FROM policy_changes latest
              WHERE latest.api_id = pc.api_id AND latest.effective_date <= $1
              ORDER BY latest.effective_date DESC, latest.changed_at DESC, latest.id DESC
              LIMIT 1
          )
          AND ($2 IS NULL OR pc.id = $2)
        ORDER BY pc.effective_date ASC, pc.id ASC
        "#,
    )
    .bind(now)
    .bind(only)
    .fetch_all(&mut *conn)
    .await?;
    Ok(changes)
}

/// Move the API to the change's target if it is not there yet, notifying active consumers.
///
/// Returns whether the row was updated.
async fn set_api_policy(
    conn: &mut SqliteConnection,
    change: &PolicyChange,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let updated = sqlx::query(
        r#"
        UPDATE apis
        SET policy_id = $1, updated_at = $2
        WHERE id = $3 AND policy_id IS NOT $1
        "#,
    )
    .bind(change.new_policy_id)
    .bind(now)
    .bind(change.api_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if updated == 0 {
        return Ok(false);
    }

    let message = match change.new_policy_id {
        Some(policy_id) => format!("API policy changed to {policy_id}"),
        None => "API policy removed".to_string(),
    };
    for grant in grants_for_api(conn, change.api_id, true).await? {
        insert_notification(
            conn,
            NewNotification::policy_changed(change.api_id, grant.consumer_id, message.clone()),
        )
        .await?;
    }
    Ok(true)
}
