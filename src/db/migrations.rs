//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use super::Database;

/// One schema step, applied atomically
struct Migration {
    version: i64,
    description: &'static str,
    statements: &'static [&'static str],
}

/// Ordered schema history; append new versions at the end
const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "fingerprints and runtime state",
    statements: &[
        r#"
        CREATE TABLE fingerprints (
            release_key TEXT NOT NULL,
            part_index INTEGER NOT NULL,
            release_title TEXT NOT NULL,
            content_hash TEXT,
            size_bytes INTEGER,
            committed_at INTEGER NOT NULL,
            PRIMARY KEY (release_key, part_index)
        )
        "#,
        "CREATE INDEX idx_fingerprints_hash ON fingerprints(content_hash)",
        r#"
        CREATE TABLE runtime_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    ],
}];

fn connection_failed(context: &str) -> impl FnOnce(String) -> Error + '_ {
    move |e| Error::Database(DatabaseError::ConnectionFailed(format!("{context}: {e}")))
}

fn migration_failed(context: String) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| Error::Database(DatabaseError::MigrationFailed(format!("{context}: {e}")))
}

impl Database {
    /// Open (or create) the database at `path` and bring its schema up to date
    ///
    /// Missing parent directories are created. The connection uses WAL
    /// journaling.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| e.to_string())
                .map_err(connection_failed("Failed to create database directory"))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| e.to_string())
            .map_err(connection_failed("Failed to parse database path"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| e.to_string())
            .map_err(connection_failed("Failed to connect to database"))?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Highest applied schema version, 0 for a fresh file
    pub async fn schema_version(&self) -> Result<i64> {
        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to query schema version: {e}"
                )))
            })?
            .flatten();
        Ok(version.unwrap_or(0))
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(migration_failed("Failed to create schema_version table".into()))?;

        let current = self.schema_version().await?;
        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            self.apply(migration).await?;
        }
        Ok(())
    }

    /// Run every statement of `migration` and record it, all or nothing
    async fn apply(&self, migration: &Migration) -> Result<()> {
        let version = migration.version;
        tracing::info!(version, description = migration.description, "Applying database migration");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(migration_failed(format!("Failed to begin migration v{version}")))?;

        for statement in migration.statements {
            sqlx::query(*statement)
                .execute(&mut *tx)
                .await
                .map_err(migration_failed(format!("Migration v{version} failed")))?;
        }

        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await
            .map_err(migration_failed(format!("Failed to record migration v{version}")))?;

        // Dropping an uncommitted transaction rolls it back
        tx.commit()
            .await
            .map_err(migration_failed(format!("Failed to commit migration v{version}")))?;

        Ok(())
    }

    /// Close the connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// The underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
