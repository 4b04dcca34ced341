//! Policy transition audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a row of `policy_changes`.
///
/// Whether a change has been applied is not stored: a due change is pending while the API's
/// live `policy_id` differs from `new_policy_id`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct PolicyChange {
    pub id: Uuid,
    pub api_id: Uuid,
    pub old_policy_id: Option<Uuid>,
    pub new_policy_id: Option<Uuid>,
    pub changed_by: String,
    pub change_reason: Option<String>,
    pub effective_date: DateTime<Utc>,
    pub changed_at: DateTime<Utc>,
}

/// Request to move an API to another policy.
///
/// `effective_date` of `None` means "now". `new_policy_id` of `None` removes the policy and is
/// only accepted for immediate changes.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyChangeRequest {
    pub api_id: Uuid,
    pub new_policy_id: Option<Uuid>,
    pub effective_date: Option<DateTime<Utc>>,
    pub change_reason: Option<String>,
    pub changed_by: String,
}

impl PolicyChangeRequest {
    pub fn new(api_id: Uuid, new_policy_id: Option<Uuid>, changed_by: impl Into<String>) -> Self {
        Self {
            api_id,
            new_policy_id,
            effective_date: None,
            change_reason: None,
            changed_by: changed_by.into(),
        }
    }

    pub fn effective_at(mut self, effective_date: DateTime<Utc>) -> Self {
        self.effective_date = Some(effective_date);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.change_reason = Some(reason.into());
        self
    }
}

/// Result of recording a change.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedChange {
    pub change: PolicyChange,
    /// True when the change was due immediately and the API was updated in the same transaction.
    pub applied: bool,
}

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerReport {
    pub pending: usize,
    pub applied: usize,
    pub failed: usize,
}
