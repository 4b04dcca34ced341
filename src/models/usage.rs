//! Usage ledger rows and period totals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::policy::RuleType;

/// One metered call. Rows in `api_usage` are immutable once written.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct ApiUsage {
    pub id: Uuid,
    pub api_id: Uuid,
    pub consumer_id: String,
    pub timestamp: DateTime<Utc>,
    pub tokens_used: i64,
    pub credits_used: f64,
    pub execution_time_ms: i64,
    pub endpoint: Option<String>,
    pub was_throttled: bool,
    pub was_blocked: bool,
}

/// A usage event to append to the ledger.
///
/// `id` and `timestamp` are assigned by the ledger when absent.
///
/// # JSON Example
///
/// ```json
/// {
///   "api_id": "550e8400-e29b-41d4-a716-446655440000",
///   "consumer_id": "consumer-7",
///   "tokens_used": 150,
///   "endpoint": "/v1/search"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct NewUsage {
    pub id: Option<Uuid>,
    pub api_id: Uuid,
    pub consumer_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tokens_used: i64,
    #[serde(default)]
    pub credits_used: f64,
    #[serde(default)]
    pub execution_time_ms: i64,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub was_throttled: bool,
    #[serde(default)]
    pub was_blocked: bool,
}

impl NewUsage {
    pub fn new(api_id: Uuid, consumer_id: impl Into<String>) -> Self {
        Self {
            id: None,
            api_id,
            consumer_id: consumer_id.into(),
            timestamp: None,
            tokens_used: 0,
            credits_used: 0.0,
            execution_time_ms: 0,
            endpoint: None,
            was_throttled: false,
            was_blocked: false,
        }
    }

    pub fn tokens(mut self, tokens: i64) -> Self {
        self.tokens_used = tokens;
        self
    }

    pub fn credits(mut self, credits: f64) -> Self {
        self.credits_used = credits;
        self
    }

    pub fn execution_time_ms(mut self, ms: i64) -> Self {
        self.execution_time_ms = ms;
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Sums of ledger rows over a time range.
#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow, Serialize)]
pub struct UsageTotals {
    pub total_requests: i64,
    pub total_tokens: i64,
    pub total_credits: f64,
    pub total_execution_time_ms: i64,
    pub throttled_requests: i64,
    pub blocked_requests: i64,
}

impl UsageTotals {
    /// The counter a rule of `rule_type` is limited on.
    ///
    /// Rate rules count admitted calls only; blocked calls never count toward a limit.
    pub fn measure(&self, rule_type: RuleType) -> f64 {
        match rule_type {
            RuleType::Token => self.total_tokens as f64,
            RuleType::Time => self.total_execution_time_ms as f64,
            RuleType::Credit => self.total_credits,
            RuleType::Rate => (self.total_requests - self.blocked_requests) as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_measure_skips_blocked_calls() {
        let totals = UsageTotals {
            total_requests: 10,
            total_tokens: 500,
            total_credits: 2.5,
            total_execution_time_ms: 1200,
            throttled_requests: 1,
            blocked_requests: 3,
        };
        assert_eq!(totals.measure(RuleType::Rate), 7.0);
        assert_eq!(totals.measure(RuleType::Token), 500.0);
        assert_eq!(totals.measure(RuleType::Credit), 2.5);
        assert_eq!(totals.measure(RuleType::Time), 1200.0);
    }
}
