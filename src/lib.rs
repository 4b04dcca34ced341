//! API governance core.
//!
//! Policies with prioritized limit rules, consumer access grants, an append-only usage ledger,
//! cached daily/weekly/monthly summaries, quota notifications and scheduled policy transitions,
//! all persisted in SQLite through `sqlx`.
//!
//! The periodic jobs ([`services::aggregation_service::refresh_summaries`],
//! [`services::notification_service::check_quotas`] and
//! [`services::transition_service::process_due_changes`]) are plain async functions; the
//! `api_governance` binary drives them on `tokio` intervals.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
