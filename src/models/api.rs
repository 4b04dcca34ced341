//! API records that policies are bound to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents an API record from the database.
///
/// # Database Table
///
/// Maps to the `apis` table. Each API:
/// - Is owned by one host user (`owner_id`)
/// - Carries a generated `api_key` that never changes after creation
/// - References at most one policy; the reference is only moved by policy transitions
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct Api {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub is_deprecated: bool,
    pub deprecation_message: Option<String>,
    pub deprecated_at: Option<DateTime<Utc>>,

    /// Opaque secret handed to consumers. Skipped when serializing an API for listing.
    #[serde(skip_serializing)]
    pub api_key: String,

    pub owner_id: String,
    pub policy_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for registering an API.
///
/// # JSON Example
///
/// ```json
/// {
///   "name": "Local search",
///   "owner_id": "host-user-1",
///   "policy_id": "550e8400-e29b-41d4-a716-446655440000"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CreateApiRequest {
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub policy_id: Option<Uuid>,

    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl CreateApiRequest {
    pub fn new(name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            owner_id: owner_id.into(),
            policy_id: None,
            is_active: true,
        }
    }

    pub fn with_policy(mut self, policy_id: Uuid) -> Self {
        self.policy_id = Some(policy_id);
        self
    }
}

/// Partial update of an API. The key and the policy reference cannot be changed here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateApiRequest {
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    #[serde(default, deserialize_with = "super::nullable")]
    pub description: Option<Option<String>>,
    pub is_active: Option<bool>,
}
