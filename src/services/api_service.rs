//! API registry - the records policies are bound to.
//!
//! An API's `api_key` is generated once at creation and never rewritten. Its `policy_id` is set
//! at creation and afterwards only moved by the transition scheduler, so the policy change
//! history stays the single account of how an API got its current policy.

use chrono::Utc;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        api::{Api, CreateApiRequest, UpdateApiRequest},
        policy::Policy,
    },
    services::policy_service::{fetch_policy, require_text},
};

/// Register a new API and generate its key.
///
/// # Errors
///
/// - `InvalidRequest`: blank name or owner
/// - `NotFound`: the referenced policy does not exist
/// - `Conflict`: key collision (practically impossible, surfaced rather than retried)
#[tracing::instrument(skip(pool, request), fields(name = %request.name))]
pub async fn create_api(pool: &DbPool, request: CreateApiRequest) -> Result<Api, AppError> {
    let mut tx = pool.begin().await?;
    let api = insert_api(&mut tx, request).await?;
    tx.commit().await?;

    tracing::info!(api_id = %api.id, "API registered");
    Ok(api)
}

/// Get an API by ID.
pub async fn get_api(pool: &DbPool, api_id: Uuid) -> Result<Api, AppError> {
    let mut conn = pool.acquire().await?;
    fetch_api(&mut conn, api_id)
        .await?
        .ok_or(AppError::NotFound("API"))
}

/// Look an API up by its key.
pub async fn get_api_by_key(pool: &DbPool, api_key: &str) -> Result<Api, AppError> {
    sqlx::query_as::<_, Api>("SELECT * FROM apis WHERE api_key = $1")
        .bind(api_key)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("API"))
}

/// List APIs, newest first.
///
/// `owner_id` narrows to one host user; deprecated APIs are skipped unless requested.
pub async fn list_apis(
    pool: &DbPool,
    owner_id: Option<&str>,
    include_deprecated: bool,
) -> Result<Vec<Api>, AppError> {
    let apis = sqlx::query_as::<_, Api>(
        r#"
        SELECT * FROM apis
        WHERE ($1 IS NULL OR owner_id = $1)
          AND ($2 OR is_deprecated = 0)
        ORDER BY created_at DESC, id ASC
        "#,
    )
    .bind(owner_id)
    .bind(include_deprecated)
    .fetch_all(pool)
    .await?;

    Ok(apis)
}

/// Update name, description or active flag. `description: Some(None)` clears the description.
pub async fn update_api(
    pool: &DbPool,
    api_id: Uuid,
    request: UpdateApiRequest,
) -> Result<Api, AppError> {
    if let Some(ref name) = request.name {
        require_text(name, "API name")?;
    }

    sqlx::query_as::<_, Api>(
        r#"
        UPDATE apis
        SET name = COALESCE($1, name),
            description = CASE WHEN $2 THEN $3 ELSE description END,
            is_active = COALESCE($4, is_active),
            updated_at = $5
        WHERE id = $6
        RETURNING *
        "#,
    )
    .bind(request.name.map(|n| n.trim().to_string()))
    .bind(request.description.is_some())
    .bind(request.description.flatten())
    .bind(request.is_active)
    .bind(Utc::now())
    .bind(api_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("API"))
}

/// Soft-deprecate an API with a message for its consumers.
///
/// Deprecating an already deprecated API replaces the message but keeps the first
/// `deprecated_at`.
pub async fn deprecate_api(pool: &DbPool, api_id: Uuid, message: &str) -> Result<Api, AppError> {
    require_text(message, "deprecation message")?;
    let now = Utc::now();

    let api = sqlx::query_as::<_, Api>(
        r#"
        UPDATE apis
        SET is_deprecated = 1,
            deprecation_message = $1,
            deprecated_at = COALESCE(deprecated_at, $2),
            updated_at = $2
        WHERE id = $3
        RETURNING *
        "#,
    )
    .bind(message)
    .bind(now)
    .bind(api_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("API"))?;

    tracing::info!(api_id = %api.id, "API deprecated");
    Ok(api)
}

/// Hard-delete an API. Administrative only: grants, usage, summaries, changes and
/// notifications of the API go with it.
#[tracing::instrument(skip(pool))]
pub async fn delete_api(pool: &DbPool, api_id: Uuid) -> Result<(), AppError> {
    let deleted = sqlx::query("DELETE FROM apis WHERE id = $1")
        .bind(api_id)
        .execute(pool)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound("API"));
    }
    tracing::warn!("API hard-deleted");
    Ok(())
}

/// Load an API on an existing connection or transaction.
pub(crate) async fn fetch_api(
    conn: &mut SqliteConnection,
    api_id: Uuid,
) -> Result<Option<Api>, AppError> {
    let api = sqlx::query_as::<_, Api>("SELECT * FROM apis WHERE id = $1")
        .bind(api_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(api)
}

/// Insert an API inside the caller's transaction. Shared with request promotion.
pub(crate) async fn insert_api(
    conn: &mut SqliteConnection,
    request: CreateApiRequest,
) -> Result<Api, AppError> {
    require_text(&request.name, "API name")?;
    require_text(&request.owner_id, "owner_id")?;

    if let Some(policy_id) = request.policy_id {
        let _policy: Policy = fetch_policy(conn, policy_id)
            .await?
            .ok_or(AppError::NotFound("Policy"))?;
    }

    let now = Utc::now();
    sqlx::query_as::<_, Api>(
        r#"
        INSERT INTO apis (id, name, description, is_active, is_deprecated, api_key, owner_id, policy_id, created_at, updated_at)
        VALUES ($1, $2, $3, $4, 0, $5, $6, $7, $8, $8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(request.name.trim())
    .bind(request.description)
    .bind(request.is_active)
    .bind(generate_api_key())
    .bind(request.owner_id)
    .bind(request.policy_id)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::from_constraint(e, "API"))
}

/// Generate an API key: `ak_` followed by 64 hex characters (32 random bytes).
fn generate_api_key() -> String {
    let bytes: [u8; 32] = rand::random();
    format!("ak_{}", hex::encode(bytes))
}
