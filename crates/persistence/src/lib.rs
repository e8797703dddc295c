//! Persistence layer for AlphaQuant
//!
//! Two kinds of storage:
//! - flat CSV files consumed by the dashboard and digest (`rankings`, `curve`,
//!   `signals`)
//! - SQLite run history for auditing screening runs (`repository`)

pub mod curve;
pub mod rankings;
pub mod repository;
pub mod schema;
pub mod signals;

pub use curve::{read_curve, write_curve, CurveRow};
pub use rankings::{read_rankings, write_rankings, RankingRow, WrittenTable};
pub use signals::{read_signals, write_signals, SignalRow};
pub use sqlx::sqlite::SqlitePool;

use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Errors from the flat-file tables (rankings, backtest curve)
#[derive(Error, Debug)]
pub enum TableError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("{path} is missing required column '{column}'")]
    MissingColumn { path: String, column: &'static str },

    #[error("Refusing to write an empty table to {0}")]
    EmptyTable(String),
}

pub type TableResult<T> = Result<T, TableError>;

/// SQLite connection pool holding the run history
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file and apply the schema
    pub async fn new(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.configure_pragmas(true).await?;
        db.run_migrations().await?;

        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub async fn in_memory() -> DbResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.configure_pragmas(false).await?;
        db.run_migrations().await?;

        Ok(db)
    }

    /// Create tables, then apply additive column migrations
    async fn run_migrations(&self) -> DbResult<()> {
        for statement in schema::CREATE_TABLES.split(';') {
            let sql: String = statement
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n");
            let sql = sql.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Migration(format!("{e}: {sql}")))?;
        }

        for migration in schema::MIGRATIONS {
            if let Err(e) = sqlx::query(migration).execute(&self.pool).await {
                // Re-running against an already migrated file
                if !e.to_string().contains("duplicate column name") {
                    return Err(DbError::Migration(format!("{e}: {migration}")));
                }
            }
        }

        Ok(())
    }

    async fn configure_pragmas(&self, on_disk: bool) -> DbResult<()> {
        if on_disk {
            sqlx::query("PRAGMA journal_mode=WAL")
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Connection(format!("WAL pragma failed: {e}")))?;

            sqlx::query("PRAGMA synchronous=NORMAL")
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Connection(format!("synchronous pragma failed: {e}")))?;
        }

        // symbol_outcomes cascade with their run
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await
            .map_err(|e| DbError::Connection(format!("foreign_keys pragma failed: {e}")))?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
