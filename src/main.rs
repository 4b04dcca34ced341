//! API governance worker - main entry point.
//!
//! Runs the periodic governance jobs against the store and exposes a liveness route.
//!
//! # Architecture
//!
//! - **Runtime**: tokio; each job runs on its own `interval`
//! - **Database**: SQLite with sqlx (WAL, foreign keys)
//! - **HTTP**: Axum, `GET /health` only
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Spawn the summary/quota job and the policy transition scheduler
//! 5. Start the health server on the configured port

use std::time::Duration;

use api_governance::{
    config::Config,
    db::{self, DbPool},
    handlers,
    services::{aggregation_service, notification_service, transition_service},
};
use axum::{Router, routing::get};
use tokio::time::MissedTickBehavior;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG (defaults to "info")
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    tokio::spawn(summary_job(
        pool.clone(),
        config.refresh_interval(),
        config.quota_warning_threshold,
    ));
    tokio::spawn(transition_job(pool.clone(), config.scheduler_interval()));

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(pool);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Refresh usage summaries, then check quotas against the fresh figures.
async fn summary_job(pool: DbPool, period: Duration, warning_threshold: f64) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if let Err(err) = aggregation_service::refresh_summaries(&pool).await {
            tracing::error!(error = %err, "summary refresh failed");
            continue;
        }
        match notification_service::check_quotas(&pool, warning_threshold).await {
            Ok(report) => tracing::debug!(
                rules = report.rules_checked,
                filed = report.notifications_filed,
                "quota check complete"
            ),
            Err(err) => tracing::error!(error = %err, "quota check failed"),
        }
    }
}

async fn transition_job(pool: DbPool, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if let Err(err) = transition_service::process_due_changes(&pool).await {
            tracing::error!(error = %err, "policy transition tick failed");
        }
    }
}
