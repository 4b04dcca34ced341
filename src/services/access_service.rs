//! Access registry - which consumers may call which APIs, and at what level.
//!
//! Grants are keyed by (api, consumer). Granting twice updates the existing row; revocation is a
//! soft state so usage rows stay attributable to a grant history.

use chrono::Utc;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::access::{AccessLevel, ApiUserAccess, GrantAccessRequest},
    services::{api_service::fetch_api, policy_service::require_text},
};

/// Grant (or update) a consumer's access to an API.
///
/// Idempotent on (api, consumer): an existing grant gets the new level and granter and is
/// reactivated if it had been revoked.
///
/// # Errors
///
/// - `InvalidRequest`: the level is not read, write or admin, or an id is blank
/// - `NotFound`: the API does not exist
#[tracing::instrument(skip(pool, request), fields(api_id = %request.api_id, consumer = %request.consumer_id))]
pub async fn grant_access(
    pool: &DbPool,
    request: GrantAccessRequest,
) -> Result<ApiUserAccess, AppError> {
    let level: AccessLevel = request
        .access_level
        .parse()
        .map_err(|e: crate::models::access::InvalidAccessLevel| {
            AppError::InvalidRequest(e.to_string())
        })?;

    let mut tx = pool.begin().await?;
    let grant = upsert_grant(
        &mut tx,
        request.api_id,
        &request.consumer_id,
        level,
        &request.granted_by,
    )
    .await?;
    tx.commit().await?;

    tracing::info!(level = %grant.access_level, "access granted");
    Ok(grant)
}

/// Revoke a grant: `is_active = false`, `revoked_at` stamped. The row is kept.
pub async fn revoke_access(
    pool: &DbPool,
    api_id: Uuid,
    consumer_id: &str,
) -> Result<ApiUserAccess, AppError> {
    let grant = sqlx::query_as::<_, ApiUserAccess>(
        r#"
        UPDATE api_user_access
        SET is_active = 0,
            revoked_at = COALESCE(revoked_at, $1)
        WHERE api_id = $2 AND consumer_id = $3
        RETURNING *
        "#,
    )
    .bind(Utc::now())
    .bind(api_id)
    .bind(consumer_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Access grant"))?;

    tracing::info!(%api_id, consumer = consumer_id, "access revoked");
    Ok(grant)
}

/// Restore a revoked grant: active again, `revoked_at` cleared, `granted_at` refreshed.
pub async fn restore_access(
    pool: &DbPool,
    api_id: Uuid,
    consumer_id: &str,
) -> Result<ApiUserAccess, AppError> {
    let grant = sqlx::query_as::<_, ApiUserAccess>(
        r#"
        UPDATE api_user_access
        SET is_active = 1,
            revoked_at = NULL,
            granted_at = $1
        WHERE api_id = $2 AND consumer_id = $3
        RETURNING *
        "#,
    )
    .bind(Utc::now())
    .bind(api_id)
    .bind(consumer_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Access grant"))?;

    tracing::info!(%api_id, consumer = consumer_id, "access restored");
    Ok(grant)
}

/// Look up the grant for (api, consumer), active or not.
pub async fn get_access(
    pool: &DbPool,
    api_id: Uuid,
    consumer_id: &str,
) -> Result<ApiUserAccess, AppError> {
    let mut conn = pool.acquire().await?;
    fetch_grant(&mut conn, api_id, consumer_id)
        .await?
        .ok_or(AppError::NotFound("Access grant"))
}

/// List the grants of an API. `active_only = false` includes revoked grants for audit.
pub async fn list_access(
    pool: &DbPool,
    api_id: Uuid,
    active_only: bool,
) -> Result<Vec<ApiUserAccess>, AppError> {
    let mut conn = pool.acquire().await?;
    grants_for_api(&mut conn, api_id, active_only).await
}

/// List the grants held by one consumer across APIs.
pub async fn list_consumer_access(
    pool: &DbPool,
    consumer_id: &str,
    active_only: bool,
) -> Result<Vec<ApiUserAccess>, AppError> {
    let grants = sqlx::query_as::<_, ApiUserAccess>(
        r#"
        SELECT * FROM api_user_access
        WHERE consumer_id = $1 AND ($2 = 0 OR is_active = 1)
        ORDER BY granted_at DESC, id ASC
        "#,
    )
    .bind(consumer_id)
    .bind(active_only)
    .fetch_all(pool)
    .await?;
    Ok(grants)
}

/// Whether the consumer holds an active grant at or above `required`.
pub async fn check_access(
    pool: &DbPool,
    api_id: Uuid,
    consumer_id: &str,
    required: AccessLevel,
) -> Result<bool, AppError> {
    let mut conn = pool.acquire().await?;
    has_access(&mut conn, api_id, consumer_id, required).await
}

pub(crate) async fn has_access(
    conn: &mut SqliteConnection,
    api_id: Uuid,
    consumer_id: &str,
    required: AccessLevel,
) -> Result<bool, AppError> {
    let grant = fetch_grant(conn, api_id, consumer_id).await?;
    Ok(grant.is_some_and(|g| g.is_active && g.access_level.satisfies(required)))
}

pub(crate) async fn fetch_grant(
    conn: &mut SqliteConnection,
    api_id: Uuid,
    consumer_id: &str,
) -> Result<Option<ApiUserAccess>, AppError> {
    let grant = sqlx::query_as::<_, ApiUserAccess>(
        "SELECT * FROM api_user_access WHERE api_id = $1 AND consumer_id = $2",
    )
    .bind(api_id)
    .bind(consumer_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(grant)
}

pub(crate) async fn grants_for_api(
    conn: &mut SqliteConnection,
    api_id: Uuid,
    active_only: bool,
) -> Result<Vec<ApiUserAccess>, AppError> {
    let grants = sqlx::query_as::<_, ApiUserAccess>(
        r#"
        SELECT * FROM api_user_access
        WHERE api_id = $1 AND ($2 = 0 OR is_active = 1)
        ORDER BY granted_at ASC, consumer_id ASC
        "#,
    )
    .bind(api_id)
    .bind(active_only)
    .fetch_all(&mut *conn)
    .await?;
    Ok(grants)
}

/// Insert or update the grant for (api, consumer) inside the caller's transaction.
pub(crate) async fn upsert_grant(
    conn: &mut SqliteConnection,
    api_id: Uuid,
    consumer_id: &str,
    level: AccessLevel,
    granted_by: &str,
) -> Result<ApiUserAccess, AppError> {
    require_text(consumer_id, "consumer_id")?;
    require_text(granted_by, "granted_by")?;

    if fetch_api(conn, api_id).await?.is_none() {
        return Err(AppError::NotFound("API"));
    }

    sqlx::query_as::<_, ApiUserAccess>(
        r#"
        INSERT INTO api_user_access (id, api_id, consumer_id, access_level, granted_by, granted_at, is_active, revoked_at)
        VALUES ($1, $2, $3, $4, $5, $6, 1, NULL)
        ON CONFLICT (api_id, consumer_id) DO UPDATE
        SET access_level = excluded.access_level,
            granted_by = excluded.granted_by,
            is_active = 1,
            revoked_at = NULL
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(api_id)
    .bind(consumer_id)
    .bind(level)
    .bind(granted_by)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::from_constraint(e, "access grant"))
}
