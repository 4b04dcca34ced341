//! API requests - consumers ask for an API, the host approves or rejects.
//!
//! Approval promotes the request in one transaction: the API is created owned by the reviewer,
//! the request's documents are re-attached to the API, the requester is granted access and the
//! request is marked approved. Any failure leaves the request pending.

use chrono::Utc;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        api::{Api, CreateApiRequest},
        api_request::{ApiRequest, ApproveApiRequest, RequestStatus, SubmitApiRequest},
        document::{AssociateDocumentRequest, EntityType},
    },
    services::{
        access_service::upsert_grant,
        api_service::insert_api,
        document_service::{associations_for_entity, insert_association},
        policy_service::require_text,
    },
};

pub async fn submit_api_request(
    pool: &DbPool,
    request: SubmitApiRequest,
) -> Result<ApiRequest, AppError> {
    require_text(&request.name, "API name")?;
    require_text(&request.requested_by, "requested_by")?;

    let created = sqlx::query_as::<_, ApiRequest>(
        r#"
        INSERT INTO api_requests (id, name, description, requested_by, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(request.name.trim())
    .bind(request.description)
    .bind(request.requested_by)
    .bind(RequestStatus::Pending)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    tracing::info!(request_id = %created.id, "API request submitted");
    Ok(created)
}

pub async fn get_api_request(pool: &DbPool, request_id: Uuid) -> Result<ApiRequest, AppError> {
    let mut conn = pool.acquire().await?;
    fetch_request(&mut conn, request_id)
        .await?
        .ok_or(AppError::NotFound("API request"))
}

/// Requests, oldest first, optionally narrowed to one status.
pub async fn list_api_requests(
    pool: &DbPool,
    status: Option<RequestStatus>,
) -> Result<Vec<ApiRequest>, AppError> {
    let requests = sqlx::query_as::<_, ApiRequest>(
        r#"
        SELECT * FROM api_requests
        WHERE ($1 IS NULL OR status = $1)
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(status)
    .fetch_all(pool)
    .await?;
    Ok(requests)
}

/// Approve a pending request and promote it into an API.
///
/// # Errors
///
/// - `NotFound`: unknown request, or unknown policy
/// - `Conflict`: the request was already reviewed
#[tracing::instrument(skip(pool, approval), fields(reviewed_by = %approval.reviewed_by))]
pub async fn approve_api_request(
    pool: &DbPool,
    request_id: Uuid,
    approval: ApproveApiRequest,
) -> Result<(ApiRequest, Api), AppError> {
    require_text(&approval.reviewed_by, "reviewed_by")?;

    let mut tx = pool.begin().await?;
    let request = pending_request(&mut tx, request_id).await?;

    let mut create = CreateApiRequest::new(request.name.clone(), approval.reviewed_by.clone());
    create.description = request.description.clone();
    create.policy_id = approval.policy_id;
    let api = insert_api(&mut tx, create).await?;

    let request_key = request.id.to_string();
    let documents = associations_for_entity(&mut tx, EntityType::ApiRequest, &request_key).await?;
    for document in &documents {
        insert_association(
            &mut tx,
            AssociateDocumentRequest::new(
                document.filename.clone(),
                api.id.to_string(),
                EntityType::Api,
                document.created_by.clone(),
            ),
        )
        .await?;
    }

    upsert_grant(
        &mut tx,
        api.id,
        &request.requested_by,
        approval.access_level,
        &approval.reviewed_by,
    )
    .await?;

    let approved = sqlx::query_as::<_, ApiRequest>(
        r#"
        UPDATE api_requests
        SET status = $1, reviewed_by = $2, review_note = $3, reviewed_at = $4, api_id = $5
        WHERE id = $6
        RETURNING *
        "#,
    )
    .bind(RequestStatus::Approved)
    .bind(&approval.reviewed_by)
    .bind(approval.review_note)
    .bind(Utc::now())
    .bind(api.id)
    .bind(request.id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        request_id = %approved.id,
        api_id = %api.id,
        documents = documents.len(),
        "API request approved"
    );
    Ok((approved, api))
}

/// Reject a pending request.
pub async fn reject_api_request(
    pool: &DbPool,
    request_id: Uuid,
    reviewed_by: &str,
    review_note: Option<String>,
) -> Result<ApiRequest, AppError> {
    require_text(reviewed_by, "reviewed_by")?;

    let mut tx = pool.begin().await?;
    let request = pending_request(&mut tx, request_id).await?;

    let rejected = sqlx::query_as::<_, ApiRequest>(
        r#"
        UPDATE api_requests
        SET status = $1, reviewed_by = $2, review_note = $3, reviewed_at = $4
        WHERE id = $5
        RETURNING *
        "#,
    )
    .bind(RequestStatus::Rejected)
    .bind(reviewed_by)
    .bind(review_note)
    .bind(Utc::now())
    .bind(request.id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(request_id = %rejected.id, "API request rejected");
    Ok(rejected)
}

async fn fetch_request(
    conn: &mut SqliteConnection,
    request_id: Uuid,
) -> Result<Option<ApiRequest>, AppError> {
    let request = sqlx::query_as::<_, ApiRequest>("SELECT * FROM api_requests WHERE id = $1")
        .bind(request_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(request)
}

async fn pending_request(
    conn: &mut SqliteConnection,
    request_id: Uuid,
) -> Result<ApiRequest, AppError> {
    let request = fetch_request(conn, request_id)
        .await?
        .ok_or(AppError::NotFound("API request"))?;

    if request.status != RequestStatus::Pending {
        return Err(AppError::Conflict(format!(
            "API request {} has already been reviewed",
            request.id
        )));
    }
    Ok(request)
}
