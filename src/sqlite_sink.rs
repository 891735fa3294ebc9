//! # SQLite-Backed Call Log
//!
//! A durable [`CallLogSink`] implementation over SQLite, for deployments
//! that want the call log on local disk without standing up anything
//! heavier. The schema is created automatically on first connection.
//!
//! Each record is stored as one row: the analytics-relevant columns
//! (request id, cost, timestamp) are first-class for indexing and
//! aggregation, and the full record rides along as JSON so the row can be
//! rehydrated losslessly.
//!
//! ### Example
//!
//! ```rust,no_run
//! use llm_gateway::sqlite_sink::SqliteCallLog;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let log = SqliteCallLog::new("call_log.db").await?;
//! let total = log.total_cost_microdollars("req-123").await?;
//! println!("request spent {} microdollars", total);
//! # Ok(())
//! # }
//! ```
//!
//! For testing, [`SqliteCallLog::new_in_memory`] avoids the filesystem.

use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::path::Path;
use tower::BoxError;

use crate::error::Result;
use crate::record::CallRecord;
use crate::sink::CallLogSink;

/// A [`CallLogSink`] that persists records to a SQLite database.
pub struct SqliteCallLog {
    pool: Pool<Sqlite>,
}

impl SqliteCallLog {
    /// Opens (creating if needed) the database at `db_path` and ensures the
    /// call-log schema exists.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePool::connect(&db_url).await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Creates an in-memory call log, useful for testing.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS call_log (
                call_id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL,
                cost_microdollars INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                record TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_call_log_request
            ON call_log(request_id, created_at)
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn insert(&self, record: &CallRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO call_log (call_id, request_id, cost_microdollars, created_at, record)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.request_id)
        .bind(record.cost_microdollars as i64)
        .bind(record.created_at.to_rfc3339())
        .bind(json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All records logged for one request, oldest first.
    pub async fn records_for_request(&self, request_id: &str) -> Result<Vec<CallRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT record FROM call_log
            WHERE request_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let json: String = row.get("record");
            records.push(serde_json::from_str(&json)?);
        }
        Ok(records)
    }

    /// Total estimated spend of one request, in microdollars.
    pub async fn total_cost_microdollars(&self, request_id: &str) -> Result<u64> {
        let total: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT SUM(cost_microdollars) FROM call_log
            WHERE request_id = ?
            "#,
        )
        .bind(request_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or(0) as u64)
    }
}

#[async_trait]
impl CallLogSink for SqliteCallLog {
    async fn insert_call_log(&self, record: CallRecord) -> std::result::Result<(), BoxError> {
        self.insert(&record).await.map_err(Into::into)
    }
}
