//! Business logic services.
//!
//! Services contain the governance logic. Every operation takes the pool (or a transaction)
//! as a parameter; multi-statement writes run in one transaction.

/// Admission decisions and metering
pub mod admission_service;
/// Daily/weekly/monthly summary refresh
pub mod aggregation_service;
/// API registry
pub mod api_service;
/// Consumer access grants
pub mod access_service;
/// Document associations
pub mod document_service;
/// Quota notifications and threshold checks
pub mod notification_service;
/// Policy and rule store
pub mod policy_service;
/// API request review and promotion
pub mod request_service;
/// Scheduled policy transitions
pub mod transition_service;
/// Append-only usage ledger
pub mod usage_service;
