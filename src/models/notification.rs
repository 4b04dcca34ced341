//! Quota notifications filed for consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::policy::RuleType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NotificationType {
    ApproachingLimit,
    LimitReached,
    PolicyChanged,
}

impl NotificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationType::ApproachingLimit => "approaching_limit",
            NotificationType::LimitReached => "limit_reached",
            NotificationType::PolicyChanged => "policy_changed",
        }
    }
}

/// Represents a row of `quota_notifications`.
///
/// Only `is_read`/`read_at` ever change after creation, and only from unread to read.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct QuotaNotification {
    pub id: Uuid,
    pub api_id: Uuid,
    pub consumer_id: String,
    pub notification_type: NotificationType,
    pub rule_id: Option<Uuid>,
    pub rule_type: Option<RuleType>,
    pub period_start: Option<DateTime<Utc>>,
    pub percentage_used: f64,
    pub message: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A notification to file.
///
/// Threshold notifications carry `rule_id` and `period_start`; together with the api, consumer
/// and type they identify one crossing, which is filed at most once.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub api_id: Uuid,
    pub consumer_id: String,
    pub notification_type: NotificationType,
    pub rule_id: Option<Uuid>,
    pub rule_type: Option<RuleType>,
    pub period_start: Option<DateTime<Utc>>,
    pub percentage_used: f64,
    pub message: String,
}

impl NewNotification {
    pub fn policy_changed(api_id: Uuid, consumer_id: impl Into<String>, message: String) -> Self {
        Self {
            api_id,
            consumer_id: consumer_id.into(),
            notification_type: NotificationType::PolicyChanged,
            rule_id: None,
            rule_type: None,
            period_start: None,
            percentage_used: 0.0,
            message,
        }
    }
}

/// Outcome of one quota check run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuotaCheckReport {
    pub rules_checked: usize,
    pub notifications_filed: usize,
}
