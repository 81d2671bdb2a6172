//! SQLite-backed state store.
//!
//! Split into focused submodules:
//! - `entities`: watched venue lookup, poll candidates, orphan cleanup
//! - `subscriptions`: the subscription registry (subscribe, unsubscribe, listings)
//! - `states`: atomic "commit new state + enqueue event" for change detection
//! - `events`: notification queue and per-chat delivery ledger
//! - `stats`: wait-time statistics

mod entities;
mod events;
mod states;
mod stats;
mod subscriptions;

pub use events::{Delivery, DeliveryStatus};
pub use states::Commit;
pub use stats::{ChatStats, GeneralStats, VenueStats};

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use woltbot_core::{
    config::{StorageBackend, StorageConfig},
    error::WoltbotError,
    model::sql_time,
    shellexpand,
};

/// How long a statement waits on a locked database before failing.
const BUSY_TIMEOUT_SECS: u64 = 10;

/// Persistent state store backed by SQLite.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new store, running migrations on first use.
    pub async fn new(config: &StorageConfig) -> Result<Self, WoltbotError> {
        match config.backend()? {
            StorageBackend::Sqlite => {}
        }

        let db_path = shellexpand(&config.db_path);

        // Ensure parent directory exists.
        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| WoltbotError::Storage(format!("invalid db path: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))
            .connect_with(opts)
            .await
            .map_err(|e| WoltbotError::Storage(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;

        info!("State store initialized at {db_path}");

        Ok(Self { pool })
    }

    /// Get the database file size in bytes.
    pub async fn db_size(&self) -> Result<u64, WoltbotError> {
        let (page_count,): (i64,) = sqlx::query_as("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| WoltbotError::Storage(format!("pragma failed: {e}")))?;

        let (page_size,): (i64,) = sqlx::query_as("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| WoltbotError::Storage(format!("pragma failed: {e}")))?;

        Ok((page_count * page_size) as u64)
    }

    /// Run SQL migrations, tracking which have already been applied.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), WoltbotError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("failed to create migrations table: {e}")))?;

        let migrations: &[(&str, &str)] = &[
            ("001_init", include_str!("../../migrations/001_init.sql")),
            (
                "002_notifications",
                include_str!("../../migrations/002_notifications.sql"),
            ),
            (
                "003_watch_sessions",
                include_str!("../../migrations/003_watch_sessions.sql"),
            ),
            (
                "004_subscription_seen",
                include_str!("../../migrations/004_subscription_seen.sql"),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<(String,)> =
                sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                    .bind(name)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        WoltbotError::Storage(format!("failed to check migration {name}: {e}"))
                    })?;

            if applied.is_some() {
                continue;
            }

            sqlx::raw_sql(sql)
                .execute(pool)
                .await
                .map_err(|e| WoltbotError::Storage(format!("migration {name} failed: {e}")))?;

            sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await
                .map_err(|e| {
                    WoltbotError::Storage(format!("failed to record migration {name}: {e}"))
                })?;

            info!("applied migration {name}");
        }
        Ok(())
    }
}

/// Current time in the store's timestamp format.
fn now() -> String {
    sql_time(Utc::now())
}

#[cfg(test)]
mod tests;
