//! Document associations.
//!
//! Files live elsewhere; this store only records which filename is attached to which entity.

use chrono::Utc;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::document::{AssociateDocumentRequest, DocumentAssociation, EntityType},
    services::policy_service::require_text,
};

/// Attach a filename to an entity.
///
/// # Errors
///
/// `Conflict` when the same filename is already attached to the entity.
pub async fn associate_document(
    pool: &DbPool,
    request: AssociateDocumentRequest,
) -> Result<DocumentAssociation, AppError> {
    let mut conn = pool.acquire().await?;
    insert_association(&mut conn, request).await
}

/// Associations of one entity, oldest first.
pub async fn get_associations_for_entity(
    pool: &DbPool,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<Vec<DocumentAssociation>, AppError> {
    let mut conn = pool.acquire().await?;
    associations_for_entity(&mut conn, entity_type, entity_id).await
}

/// Every entity a filename is attached to.
pub async fn get_all_associations_for_document(
    pool: &DbPool,
    filename: &str,
) -> Result<Vec<DocumentAssociation>, AppError> {
    let associations = sqlx::query_as::<_, DocumentAssociation>(
        r#"
        SELECT * FROM document_associations
        WHERE filename = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(filename)
    .fetch_all(pool)
    .await?;
    Ok(associations)
}

pub async fn remove_association(pool: &DbPool, association_id: Uuid) -> Result<(), AppError> {
    let removed = sqlx::query("DELETE FROM document_associations WHERE id = $1")
        .bind(association_id)
        .execute(pool)
        .await?
        .rows_affected();

    if removed == 0 {
        return Err(AppError::NotFound("Document association"));
    }
    Ok(())
}

pub(crate) async fn insert_association(
    conn: &mut SqliteConnection,
    request: AssociateDocumentRequest,
) -> Result<DocumentAssociation, AppError> {
    require_text(&request.filename, "filename")?;
    require_text(&request.entity_id, "entity_id")?;
    require_text(&request.created_by, "created_by")?;

    sqlx::query_as::<_, DocumentAssociation>(
        r#"
        INSERT INTO document_associations (id, filename, entity_id, entity_type, created_by, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(request.filename)
    .bind(request.entity_id)
    .bind(request.entity_type)
    .bind(request.created_by)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::from_constraint(e, "document association"))
}

pub(crate) async fn associations_for_entity(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<Vec<DocumentAssociation>, AppError> {
    let associations = sqlx::query_as::<_, DocumentAssociation>(
        r#"
        SELECT * FROM document_associations
        WHERE entity_type = $1 AND entity_id = $2
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(entity_type)
    .bind(entity_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(associations)
}
