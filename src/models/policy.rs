//! Policy and rule models.
//!
//! This module defines:
//! - `Policy`: the unit an API is bound to
//! - `PolicyRule`: one limit inside a policy, evaluated in ascending priority
//! - Request, filter and sort types used by the policy store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::period::Period;

/// What kind of limit a policy primarily enforces.
///
/// `Composite` mixes rule types; `Free` carries no limiting rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PolicyType {
    Token,
    Time,
    Credit,
    Rate,
    Composite,
    Free,
}

/// Which usage counter a rule measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RuleType {
    /// Sum of `tokens_used`
    Token,
    /// Sum of `execution_time_ms`; limits are milliseconds
    Time,
    /// Sum of `credits_used`
    Credit,
    /// Number of admitted (non-blocked) calls
    Rate,
}

impl RuleType {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleType::Token => "token",
            RuleType::Time => "time",
            RuleType::Credit => "credit",
            RuleType::Rate => "rate",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens when a rule's limit is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RuleAction {
    Block,
    Throttle,
    Notify,
    Log,
}

impl RuleAction {
    /// Block and throttle end rule evaluation for a call; notify and log do not.
    pub fn is_terminal(self) -> bool {
        matches!(self, RuleAction::Block | RuleAction::Throttle)
    }
}

/// Represents a policy record from the database.
///
/// Maps to the `policies` table. Rules live in `policy_rules` and are deleted with the policy.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct Policy {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub policy_type: PolicyType,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single limit within a policy.
///
/// # Evaluation
///
/// Lower `priority` evaluates first. The first rule whose limit is reached and whose action
/// is block or throttle decides the call.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct PolicyRule {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub rule_type: RuleType,
    pub limit_value: f64,
    pub period: Period,
    pub action: RuleAction,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
}

/// Request body for creating a policy.
///
/// ```json
/// {
///   "name": "Standard tier",
///   "policy_type": "composite",
///   "created_by": "host-user-1"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePolicyRequest {
    pub name: String,
    pub description: Option<String>,
    pub policy_type: PolicyType,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_by: String,
}

fn default_true() -> bool {
    true
}

impl CreatePolicyRequest {
    pub fn new(name: impl Into<String>, policy_type: PolicyType, created_by: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            policy_type,
            is_active: true,
            created_by: created_by.into(),
        }
    }
}

/// Partial update of a policy. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePolicyRequest {
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    #[serde(default, deserialize_with = "super::nullable")]
    pub description: Option<Option<String>>,
    pub policy_type: Option<PolicyType>,
    pub is_active: Option<bool>,
}

/// Request body for one rule.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRuleRequest {
    pub rule_type: RuleType,
    pub limit_value: f64,
    pub period: Period,
    pub action: RuleAction,
    #[serde(default = "default_priority")]
    pub priority: i64,
}

fn default_priority() -> i64 {
    100
}

impl CreateRuleRequest {
    pub fn new(
        rule_type: RuleType,
        limit_value: f64,
        period: Period,
        action: RuleAction,
        priority: i64,
    ) -> Self {
        Self {
            rule_type,
            limit_value,
            period,
            action,
            priority,
        }
    }
}

/// How to treat APIs that still reference a policy being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicyMode {
    /// Refuse the delete while any API references the policy.
    #[default]
    Restrict,
    /// Delete anyway; referencing APIs end up with no policy.
    Detach,
}

/// Sortable policy columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySort {
    Name,
    PolicyType,
    #[default]
    CreatedAt,
    UpdatedAt,
}

impl PolicySort {
    /// Column the sort maps to. The only source of `ORDER BY` text in policy listing.
    pub fn column(self) -> &'static str {
        match self {
            PolicySort::Name => "name",
            PolicySort::PolicyType => "policy_type",
            PolicySort::CreatedAt => "created_at",
            PolicySort::UpdatedAt => "updated_at",
        }
    }
}

impl FromStr for PolicySort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(PolicySort::Name),
            "policy_type" | "type" => Ok(PolicySort::PolicyType),
            "created_at" => Ok(PolicySort::CreatedAt),
            "updated_at" => Ok(PolicySort::UpdatedAt),
            other => Err(format!("cannot sort policies by '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filters and paging for policy listing.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyFilter {
    pub policy_type: Option<PolicyType>,
    #[serde(default)]
    pub active_only: bool,
    pub created_by: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub sort: PolicySort,
    #[serde(default)]
    pub order: SortOrder,
}

fn default_limit() -> i64 {
    50
}

impl Default for PolicyFilter {
    fn default() -> Self {
        Self {
            policy_type: None,
            active_only: false,
            created_by: None,
            limit: default_limit(),
            offset: 0,
            sort: PolicySort::default(),
            order: SortOrder::default(),
        }
    }
}

/// A policy together with its rules in evaluation order.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyWithRules {
    #[serde(flatten)]
    pub policy: Policy,
    pub rules: Vec<PolicyRule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_parses_only_whitelisted_columns() {
        assert_eq!("name".parse::<PolicySort>(), Ok(PolicySort::Name));
        assert_eq!("type".parse::<PolicySort>(), Ok(PolicySort::PolicyType));
        assert!("name; DROP TABLE policies".parse::<PolicySort>().is_err());
    }

    #[test]
    fn only_block_and_throttle_terminate() {
        assert!(RuleAction::Block.is_terminal());
        assert!(RuleAction::Throttle.is_terminal());
        assert!(!RuleAction::Notify.is_terminal());
        assert!(!RuleAction::Log.is_terminal());
    }
}
