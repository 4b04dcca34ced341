//! Database connection pool and migration management.
//!
//! This module provides utilities for:
//! - Creating a SQLite connection pool (WAL, foreign keys, busy timeout)
//! - Running database migrations automatically

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<Sqlite>;

/// Create a new SQLite connection pool.
///
/// # Arguments
///
/// * `database_url` - SQLite connection string (`sqlite://path.db` or `sqlite::memory:`)
/// * `max_connections` - pool size; 1 serializes every writer at the pool
///
/// # Configuration
///
/// - Write-ahead logging so readers don't block the writer
/// - `foreign_keys` on: rule cascades and `apis.policy_id ON DELETE SET NULL` depend on it
/// - 5s busy timeout
/// - Connections never expire, so an in-memory database lives as long as the pool
///
/// # Errors
///
/// Returns an error if the connection string is invalid or the database file cannot be opened.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
}

/// Run database migrations from the `migrations/` directory.
///
/// Migrations are tracked in the `_sqlx_migrations` table, so each migration runs only once.
///
/// # Errors
///
/// Returns an error if a migration fails or the recorded checksum of an applied migration changed.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    // The macro embeds ./migrations at compile time
    sqlx::migrate!("./migrations").run(pool).await
}

/// Open an isolated in-memory store with the schema applied.
///
/// Each call returns an independent database; used by tests and by embedding callers that want
/// a throwaway store.
pub async fn connect_in_memory() -> Result<DbPool, crate::error::AppError> {
    let pool = create_pool("sqlite::memory:", 1).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
