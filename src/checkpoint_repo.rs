// Durable run progress. Single-row table: the store only ever tracks one
// run's checkpoint, and mutual exclusion across invocations is external
// (run lock), so one writer is assumed.

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

use crate::error::StoreError;
use crate::models::{Checkpoint, CheckpointStatus, TimeRange};

pub struct CheckpointRepo {
    pool: SqlitePool,
}

impl CheckpointRepo {
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoint (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                window_start INTEGER NOT NULL,
                window_end INTEGER NOT NULL,
                boundary INTEGER NOT NULL,
                status TEXT NOT NULL,
                agg_state TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load(&self) -> Result<Option<Checkpoint>, StoreError> {
        let row = sqlx::query(
            "SELECT window_start, window_end, boundary, status, agg_state, updated_at FROM checkpoint WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let window_start: i64 = row.try_get("window_start").map_err(StoreError::from)?;
        let window_end: i64 = row.try_get("window_end").map_err(StoreError::from)?;
        let boundary: i64 = row.try_get("boundary").map_err(StoreError::from)?;
        let status_str: String = row.try_get("status").map_err(StoreError::from)?;
        let agg_state: String = row.try_get("agg_state").map_err(StoreError::from)?;
        let updated_at: i64 = row.try_get("updated_at").map_err(StoreError::from)?;

        let status = CheckpointStatus::parse(&status_str)
            .ok_or_else(|| StoreError::Permanent(format!("unknown checkpoint status: {}", status_str)))?;

        Ok(Some(Checkpoint {
            window: TimeRange::new(window_start, window_end),
            boundary,
            status,
            agg_state,
            updated_at,
        }))
    }

    /// Starts a fresh run: checkpoint at the window start, in progress, empty
    /// accumulator. Replaces any previous run's row.
    #[instrument(skip(self), fields(repo = "checkpoint", operation = "begin"))]
    pub async fn begin(&self, window: TimeRange) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoint (id, window_start, window_end, boundary, status, agg_state, updated_at)
             VALUES (1, $1, $2, $3, $4, $5, $6)",
        )
        .bind(window.start)
        .bind(window.end)
        .bind(window.start)
        .bind(CheckpointStatus::InProgress.as_str())
        .bind("{}")
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    /// Re-arms a resumed run: status back to in progress, boundary untouched.
    #[instrument(skip(self), fields(repo = "checkpoint", operation = "resume"))]
    pub async fn resume(&self) -> Result<(), StoreError> {
        sqlx::query("UPDATE checkpoint SET status = $1, updated_at = $2 WHERE id = 1")
            .bind(CheckpointStatus::InProgress.as_str())
            .bind(now_ms())
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    /// Commits one chunk: watermark and accumulator advance atomically.
    #[instrument(skip(self, agg_state), fields(repo = "checkpoint", operation = "advance", boundary))]
    pub async fn advance(&self, boundary: i64, agg_state: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE checkpoint SET boundary = $1, agg_state = $2, updated_at = $3 WHERE id = 1",
        )
        .bind(boundary)
        .bind(agg_state)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    /// Finishes the window: boundary jumps to window_end, accumulator is
    /// spent. Only called after the rollup flush is durable.
    #[instrument(skip(self), fields(repo = "checkpoint", operation = "complete"))]
    pub async fn complete(&self) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE checkpoint SET boundary = window_end, status = $1, agg_state = '{}', updated_at = $2 WHERE id = 1",
        )
        .bind(CheckpointStatus::Complete.as_str())
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    /// Records a fatal abort. Boundary stays where the last commit left it so
    /// the next invocation resumes there.
    #[instrument(skip(self), fields(repo = "checkpoint", operation = "mark_failed"))]
    pub async fn mark_failed(&self) -> Result<(), StoreError> {
        sqlx::query("UPDATE checkpoint SET status = $1, updated_at = $2 WHERE id = 1")
            .bind(CheckpointStatus::Failed.as_str())
            .bind(now_ms())
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
