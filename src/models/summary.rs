//! Aggregated usage summaries.
//!
//! Summary rows are a cache derived from `api_usage`; they can be dropped and recomputed at any
//! time without losing information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::period::PeriodType;
use crate::models::usage::UsageTotals;

/// One row per (api, consumer, period_type, period_start).
///
/// `period_end` is the exclusive end of the bucket.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct ApiUsageSummary {
    pub id: Uuid,
    pub api_id: Uuid,
    pub consumer_id: String,
    pub period_type: PeriodType,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_requests: i64,
    pub total_tokens: i64,
    pub total_credits: f64,
    pub total_execution_time_ms: i64,
    pub throttled_requests: i64,
    pub blocked_requests: i64,
    pub last_updated: DateTime<Utc>,
}

impl ApiUsageSummary {
    pub fn totals(&self) -> UsageTotals {
        UsageTotals {
            total_requests: self.total_requests,
            total_tokens: self.total_tokens,
            total_credits: self.total_credits,
            total_execution_time_ms: self.total_execution_time_ms,
            throttled_requests: self.throttled_requests,
            blocked_requests: self.blocked_requests,
        }
    }
}

/// Query parameters for reading summaries of one API.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryFilter {
    pub api_id: Uuid,
    pub consumer_id: Option<String>,
    pub period_type: Option<PeriodType>,
    /// Inclusive lower bound on `period_start`
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `period_start`
    pub to: Option<DateTime<Utc>>,
}

impl SummaryFilter {
    pub fn for_api(api_id: Uuid) -> Self {
        Self {
            api_id,
            consumer_id: None,
            period_type: None,
            from: None,
            to: None,
        }
    }
}

/// Outcome of one aggregation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub apis_refreshed: usize,
    pub apis_failed: usize,
    pub rows_upserted: usize,
}
