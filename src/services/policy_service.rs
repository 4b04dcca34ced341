//! Policy store - policies and their ordered rule sets.
//!
//! This service handles:
//! - Policy CRUD with filtered, paged listing
//! - Rule creation, listing and deletion
//! - Atomic rule-set replacement (delete all, then recreate, in one transaction)
//!
//! # Referential behavior
//!
//! Deleting a policy cascades to its rules. APIs that reference it either block the delete
//! ([`DeletePolicyMode::Restrict`]) or lose their reference through the
//! `ON DELETE SET NULL` foreign key ([`DeletePolicyMode::Detach`]).

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::policy::{
        CreatePolicyRequest, CreateRuleRequest, DeletePolicyMode, Policy, PolicyFilter,
        PolicyRule, PolicyWithRules, UpdatePolicyRequest,
    },
};

const MAX_PAGE_SIZE: i64 = 500;

/// Create a policy.
///
/// # Errors
///
/// - `InvalidRequest`: name or creator is blank
/// - `Database`: database error occurred
#[tracing::instrument(skip(pool, request), fields(name = %request.name))]
pub async fn create_policy(pool: &DbPool, request: CreatePolicyRequest) -> Result<Policy, AppError> {
    require_text(&request.name, "policy name")?;
    require_text(&request.created_by, "created_by")?;

    let now = Utc::now();
    let policy = sqlx::query_as::<_, Policy>(
        r#"
        INSERT INTO policies (id, name, description, policy_type, is_active, created_by, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(request.name.trim())
    .bind(request.description)
    .bind(request.policy_type)
    .bind(request.is_active)
    .bind(request.created_by)
    .bind(now)
    .fetch_one(pool)
    .await
    .map_err(|e| AppError::from_constraint(e, "policy"))?;

    tracing::info!(policy_id = %policy.id, "policy created");
    Ok(policy)
}

/// Get a policy by ID.
pub async fn get_policy(pool: &DbPool, policy_id: Uuid) -> Result<Policy, AppError> {
    sqlx::query_as::<_, Policy>("SELECT * FROM policies WHERE id = $1")
        .bind(policy_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Policy"))
}

/// Get a policy with its rules in evaluation order.
pub async fn get_policy_with_rules(
    pool: &DbPool,
    policy_id: Uuid,
) -> Result<PolicyWithRules, AppError> {
    let policy = get_policy(pool, policy_id).await?;
    let rules = list_rules(pool, policy_id).await?;
    Ok(PolicyWithRules { policy, rules })
}

/// Apply a partial update to a policy.
///
/// Fields left as `None` keep their stored value; `description: Some(None)` clears it.
/// `updated_at` is always refreshed.
pub async fn update_policy(
    pool: &DbPool,
    policy_id: Uuid,
    request: UpdatePolicyRequest,
) -> Result<Policy, AppError> {
    if let Some(ref name) = request.name {
        require_text(name, "policy name")?;
    }

    let policy = sqlx::query_as::<_, Policy>(
        r#"
        UPDATE policies
        SET name = COALESCE($1, name),
            description = CASE WHEN $2 THEN $3 ELSE description END,
            policy_type = COALESCE($4, policy_type),
            is_active = COALESCE($5, is_active),
            updated_at = $6
        WHERE id = $7
        RETURNING *
        "#,
    )
    .bind(request.name.map(|n| n.trim().to_string()))
    .bind(request.description.is_some())
    .bind(request.description.flatten())
    .bind(request.policy_type)
    .bind(request.is_active)
    .bind(Utc::now())
    .bind(policy_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::from_constraint(e, "policy"))?
    .ok_or(AppError::NotFound("Policy"))?;

    Ok(policy)
}

/// Delete a policy and its rules.
///
/// # Errors
///
/// - `NotFound`: no such policy
/// - `Conflict`: mode is `Restrict` and at least one API references the policy
#[tracing::instrument(skip(pool))]
pub async fn delete_policy(
    pool: &DbPool,
    policy_id: Uuid,
    mode: DeletePolicyMode,
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    let referencing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM apis WHERE policy_id = $1")
        .bind(policy_id)
        .fetch_one(&mut *tx)
        .await?;

    if referencing > 0 && mode == DeletePolicyMode::Restrict {
        return Err(AppError::Conflict(format!(
            "policy is referenced by {referencing} API(s)"
        )));
    }

    let deleted = sqlx::query("DELETE FROM policies WHERE id = $1")
        .bind(policy_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound("Policy"));
    }

    tx.commit().await?;

    if referencing > 0 {
        tracing::warn!(apis = referencing, "policy deleted; referencing APIs now have no policy");
    } else {
        tracing::info!("policy deleted");
    }
    Ok(())
}

/// List policies with filters, paging and a whitelisted sort column.
pub async fn list_policies(pool: &DbPool, filter: PolicyFilter) -> Result<Vec<Policy>, AppError> {
    if filter.limit <= 0 || filter.offset < 0 {
        return Err(AppError::InvalidRequest(
            "limit must be positive and offset non-negative".to_string(),
        ));
    }

    let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM policies WHERE 1 = 1");
    if let Some(policy_type) = filter.policy_type {
        query.push(" AND policy_type = ").push_bind(policy_type);
    }
    if filter.active_only {
        query.push(" AND is_active = 1");
    }
    if let Some(created_by) = filter.created_by {
        query.push(" AND created_by = ").push_bind(created_by);
    }
    // Sort column and direction come from enums, never from caller text
    query
        .push(" ORDER BY ")
        .push(filter.sort.column())
        .push(" ")
        .push(filter.order.keyword())
        .push(", id ASC LIMIT ")
        .push_bind(filter.limit.min(MAX_PAGE_SIZE))
        .push(" OFFSET ")
        .push_bind(filter.offset);

    let policies = query.build_query_as::<Policy>().fetch_all(pool).await?;
    Ok(policies)
}

/// Add one rule to a policy.
pub async fn create_rule(
    pool: &DbPool,
    policy_id: Uuid,
    request: CreateRuleRequest,
) -> Result<PolicyRule, AppError> {
    validate_rule(&request)?;
    let mut conn = pool.acquire().await?;
    ensure_policy_exists(&mut conn, policy_id).await?;
    insert_rule(&mut conn, policy_id, &request).await
}

/// Add a batch of rules to a policy in one transaction.
///
/// # Errors
///
/// - `InvalidRequest`: empty batch or an invalid rule; nothing is written
pub async fn create_rules(
    pool: &DbPool,
    policy_id: Uuid,
    requests: Vec<CreateRuleRequest>,
) -> Result<Vec<PolicyRule>, AppError> {
    validate_batch(&requests)?;

    let mut tx = pool.begin().await?;
    ensure_policy_exists(&mut tx, policy_id).await?;
    let mut rules = Vec::with_capacity(requests.len());
    for request in &requests {
        rules.push(insert_rule(&mut tx, policy_id, request).await?);
    }
    tx.commit().await?;

    Ok(rules)
}

/// List a policy's rules in evaluation order (ascending priority, then id).
pub async fn list_rules(pool: &DbPool, policy_id: Uuid) -> Result<Vec<PolicyRule>, AppError> {
    let mut conn = pool.acquire().await?;
    rules_for_policy(&mut conn, policy_id).await
}

/// Delete a single rule.
pub async fn delete_rule(pool: &DbPool, rule_id: Uuid) -> Result<(), AppError> {
    let deleted = sqlx::query("DELETE FROM policy_rules WHERE id = $1")
        .bind(rule_id)
        .execute(pool)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound("Policy rule"));
    }
    Ok(())
}

/// Delete every rule of a policy. Returns how many rules were removed.
pub async fn delete_rules_for_policy(pool: &DbPool, policy_id: Uuid) -> Result<u64, AppError> {
    let deleted = sqlx::query("DELETE FROM policy_rules WHERE policy_id = $1")
        .bind(policy_id)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(deleted)
}

/// Replace a policy's rule set atomically.
///
/// Deletes all existing rules and inserts the new ones in one transaction. If any insert fails
/// the transaction is dropped and the previous rule set is untouched.
#[tracing::instrument(skip(pool, requests), fields(rules = requests.len()))]
pub async fn replace_rules(
    pool: &DbPool,
    policy_id: Uuid,
    requests: Vec<CreateRuleRequest>,
) -> Result<Vec<PolicyRule>, AppError> {
    validate_batch(&requests)?;

    let mut tx = pool.begin().await?;
    ensure_policy_exists(&mut tx, policy_id).await?;

    sqlx::query("DELETE FROM policy_rules WHERE policy_id = $1")
        .bind(policy_id)
        .execute(&mut *tx)
        .await?;

    let mut rules = Vec::with_capacity(requests.len());
    for request in &requests {
        rules.push(insert_rule(&mut tx, policy_id, request).await?);
    }

    sqlx::query("UPDATE policies SET updated_at = $1 WHERE id = $2")
        .bind(Utc::now())
        .bind(policy_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    rules.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));
    tracing::info!("rule set replaced");
    Ok(rules)
}

/// Rules of a policy in evaluation order, on an existing connection or transaction.
pub(crate) async fn rules_for_policy(
    conn: &mut SqliteConnection,
    policy_id: Uuid,
) -> Result<Vec<PolicyRule>, AppError> {
    let rules = sqlx::query_as::<_, PolicyRule>(
        "SELECT * FROM policy_rules WHERE policy_id = $1 ORDER BY priority ASC, id ASC",
    )
    .bind(policy_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rules)
}

/// Load a policy on an existing connection or transaction.
pub(crate) async fn fetch_policy(
    conn: &mut SqliteConnection,
    policy_id: Uuid,
) -> Result<Option<Policy>, AppError> {
    let policy = sqlx::query_as::<_, Policy>("SELECT * FROM policies WHERE id = $1")
        .bind(policy_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(policy)
}

async fn ensure_policy_exists(conn: &mut SqliteConnection, policy_id: Uuid) -> Result<(), AppError> {
    match fetch_policy(conn, policy_id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound("Policy")),
    }
}

async fn insert_rule(
    conn: &mut SqliteConnection,
    policy_id: Uuid,
    request: &CreateRuleRequest,
) -> Result<PolicyRule, AppError> {
    sqlx::query_as::<_, PolicyRule>(
        r#"
        INSERT INTO policy_rules (id, policy_id, rule_type, limit_value, period, action, priority, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(policy_id)
    .bind(request.rule_type)
    .bind(request.limit_value)
    .bind(request.period)
    .bind(request.action)
    .bind(request.priority)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::from_constraint(e, "policy rule"))
}

fn validate_batch(requests: &[CreateRuleRequest]) -> Result<(), AppError> {
    if requests.is_empty() {
        return Err(AppError::InvalidRequest("rule batch is empty".to_string()));
    }
    requests.iter().try_for_each(validate_rule)
}

fn validate_rule(request: &CreateRuleRequest) -> Result<(), AppError> {
    if !request.limit_value.is_finite() || request.limit_value <= 0.0 {
        return Err(AppError::InvalidRequest(
            "rule limit must be a positive number".to_string(),
        ));
    }
    if request.priority < 0 {
        return Err(AppError::InvalidRequest(
            "rule priority must be non-negative".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn require_text(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidRequest(format!("{field} is required")));
    }
    Ok(())
}
