//! Artifact index persistence using SQLite with sqlx.
//!
//! One row per raw artifact key records where the file lives, its status and
//! how many attempts the last download took, so runs survive restarts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use zampy_common::{ArtifactKey, ArtifactStatus, Result, ZampyError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS artifacts (
    key TEXT PRIMARY KEY,
    dataset TEXT NOT NULL,
    variable TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT NOT NULL,
    north REAL NOT NULL,
    east REAL NOT NULL,
    south REAL NOT NULL,
    west REAL NOT NULL,
    path TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

fn db_error(err: sqlx::Error) -> ZampyError {
    ZampyError::Index(err.to_string())
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// A row of the artifact index.
#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    pub key: String,
    pub dataset: String,
    pub variable: String,
    pub path: PathBuf,
    pub status: ArtifactStatus,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Artifact counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub pending: u64,
    pub complete: u64,
    pub failed: u64,
}

impl IndexStats {
    pub fn total(&self) -> u64 {
        self.pending + self.complete + self.failed
    }
}

type RecordRow = (
    String,
    String,
    String,
    String,
    String,
    i64,
    Option<String>,
    String,
    String,
);

/// Persistent index of raw artifacts.
#[derive(Clone)]
pub struct ArtifactIndex {
    pool: SqlitePool,
}

impl ArtifactIndex {
    /// Open or create the index database at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_error)?;

        Self::migrate(&pool).await?;
        info!(path = %path.display(), "Opened artifact index");
        Ok(Self { pool })
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_error)?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::query(SCHEMA).execute(pool).await.map_err(db_error)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_artifacts_status ON artifacts(status)")
            .execute(pool)
            .await
            .map_err(db_error)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_artifacts_dataset ON artifacts(dataset)")
            .execute(pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    pub async fn get(&self, key: &ArtifactKey) -> Result<Option<ArtifactRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(
            r#"
            SELECT key, dataset, variable, path, status, attempts,
                   error_message, created_at, updated_at
            FROM artifacts WHERE key = ?
            "#,
        )
        .bind(key.id())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(|row| ArtifactRecord {
            key: row.0,
            dataset: row.1,
            variable: row.2,
            path: PathBuf::from(row.3),
            status: ArtifactStatus::parse(&row.4),
            attempts: row.5 as u32,
            error_message: row.6,
            created_at: parse_time(&row.7),
            updated_at: parse_time(&row.8),
        }))
    }

    /// Insert or reset the row for `key` to `pending` with zero attempts.
    pub async fn mark_pending(&self, key: &ArtifactKey, path: &Path) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO artifacts (key, dataset, variable, start_time, end_time,
                                   north, east, south, west, path, status, attempts,
                                   created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                path = excluded.path,
                status = 'pending',
                attempts = 0,
                error_message = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key.id())
        .bind(&key.dataset)
        .bind(&key.variable)
        .bind(key.time.start.to_rfc3339())
        .bind(key.time.end.to_rfc3339())
        .bind(key.bounds.north)
        .bind(key.bounds.east)
        .bind(key.bounds.south)
        .bind(key.bounds.west)
        .bind(path.display().to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        debug!(key = %key, "Marked artifact pending");
        Ok(())
    }

    /// Record a failed attempt that will be retried.
    pub async fn record_attempt(&self, key: &ArtifactKey, attempts: u32, error: &str) -> Result<()> {
        self.update(key, ArtifactStatus::Pending, attempts, Some(error))
            .await
    }

    pub async fn mark_complete(&self, key: &ArtifactKey, attempts: u32) -> Result<()> {
        self.update(key, ArtifactStatus::Complete, attempts, None)
            .await
    }

    pub async fn mark_failed(&self, key: &ArtifactKey, attempts: u32, error: &str) -> Result<()> {
        self.update(key, ArtifactStatus::Failed, attempts, Some(error))
            .await
    }

    async fn update(
        &self,
        key: &ArtifactKey,
        status: ArtifactStatus,
        attempts: u32,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE artifacts SET status = ?, attempts = ?, error_message = ?, updated_at = ? WHERE key = ?",
        )
        .bind(status.as_str())
        .bind(attempts as i64)
        .bind(error)
        .bind(&now)
        .bind(key.id())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    /// Artifact counts per status.
    pub async fn stats(&self) -> Result<IndexStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM artifacts GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;

        let mut stats = IndexStats::default();
        for (status, count) in rows {
            let count = count as u64;
            match ArtifactStatus::parse(&status) {
                ArtifactStatus::Pending => stats.pending += count,
                ArtifactStatus::Complete => stats.complete += count,
                ArtifactStatus::Failed => stats.failed += count,
            }
        }
        Ok(stats)
    }

    /// All failed rows, most recent first.
    pub async fn failed(&self) -> Result<Vec<(String, Option<String>)>> {
        sqlx::query_as(
            "SELECT key, error_message FROM artifacts WHERE status = 'failed' ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }
}
