//! Liveness route of the governance worker.

use crate::{db::DbPool, error::AppError, services::transition_service};
use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Body of `GET /health`.
///
/// ```json
/// {
///   "status": "healthy",
///   "database": "connected",
///   "pending_policy_changes": 0,
///   "timestamp": "2025-12-21T19:00:00Z"
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    /// Due policy changes the scheduler has not applied yet. A count that stays above zero
    /// across ticks points at a stuck scheduler.
    pub pending_policy_changes: usize,
    pub timestamp: DateTime<Utc>,
}

/// Report store connectivity and scheduler backlog.
///
/// An unreachable store surfaces as the standard error body with status 500.
pub async fn health_check(State(pool): State<DbPool>) -> Result<Json<HealthResponse>, AppError> {
    let pending_policy_changes = transition_service::count_pending_changes(&pool).await?;

    Ok(Json(HealthResponse {
        status: "healthy",
        database: "connected",
        pending_policy_changes,
        timestamp: Utc::now(),
    }))
}
