//! Opening the config store and bringing its schema up to date.
//!
//! Everything the downloader persists (source settings and the download
//! history list) lives as rows of the `settings` key/value table, so the
//! schema is small. Each migration is one entry in [`MIGRATIONS`], applied in
//! its own transaction and recorded in `schema_version`.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use super::Database;

/// A schema step: version, what it provides, and the DDL it runs
struct Migration {
    version: i64,
    provides: &'static str,
    sql: &'static str,
}

/// Ordered schema history
const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    provides: "key/value store for source settings and the download history list",
    sql: r#"
        CREATE TABLE settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
    "#,
}];

fn migration_failed(what: impl std::fmt::Display, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::MigrationFailed(format!("{what}: {e}")))
}

impl Database {
    /// Open (or create) the config store at `path` and apply pending migrations
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Apply every migration newer than the recorded schema version
    async fn migrate(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| migration_failed("Failed to create schema_version table", e))?;

        let applied: i64 =
            sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(version) FROM schema_version")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .unwrap_or(0);

        for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
            Self::apply(&mut conn, migration).await?;
        }
        Ok(())
    }

    async fn apply(conn: &mut SqliteConnection, migration: &Migration) -> Result<()> {
        tracing::info!(
            version = migration.version,
            provides = migration.provides,
            "applying config store migration"
        );

        let step = format!("migration v{}", migration.version);
        let mut tx = sqlx::Connection::begin(&mut *conn)
            .await
            .map_err(|e| migration_failed(format!("Failed to begin {step}"), e))?;

        sqlx::query(migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| migration_failed(format!("Failed to run {step}"), e))?;

        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(migration.version)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await
            .map_err(|e| migration_failed(format!("Failed to record {step}"), e))?;

        // Dropping the transaction on an error above rolls it back
        tx.commit()
            .await
            .map_err(|e| migration_failed(format!("Failed to commit {step}"), e))?;
        Ok(())
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
