//! Consumer requests for new APIs, reviewed by the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::access::AccessLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

/// Represents a row of `api_requests`.
///
/// `api_id` is set once the request is approved and promoted into an API.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct ApiRequest {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub requested_by: String,
    pub status: RequestStatus,
    pub reviewed_by: Option<String>,
    pub review_note: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub api_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitApiRequest {
    pub name: String,
    pub description: Option<String>,
    pub requested_by: String,
}

/// Review decision that promotes a request into an API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApproveApiRequest {
    pub reviewed_by: String,
    pub policy_id: Option<Uuid>,
    /// Level granted to the requester on the new API
    #[serde(default = "default_level")]
    pub access_level: AccessLevel,
    pub review_note: Option<String>,
}

fn default_level() -> AccessLevel {
    AccessLevel::Read
}

impl ApproveApiRequest {
    pub fn new(reviewed_by: impl Into<String>) -> Self {
        Self {
            reviewed_by: reviewed_by.into(),
            policy_id: None,
            access_level: default_level(),
            review_note: None,
        }
    }
}
