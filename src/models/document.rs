//! Documents attached to APIs, API requests and policies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EntityType {
    Api,
    ApiRequest,
    Policy,
}

/// One association of a filename with an entity. Unique on (filename, entity_id, entity_type).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct DocumentAssociation {
    pub id: Uuid,
    pub filename: String,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssociateDocumentRequest {
    pub filename: String,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub created_by: String,
}

impl AssociateDocumentRequest {
    pub fn new(
        filename: impl Into<String>,
        entity_id: impl Into<String>,
        entity_type: EntityType,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            entity_id: entity_id.into(),
            entity_type,
            created_by: created_by.into(),
        }
    }
}
