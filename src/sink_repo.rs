// Destination bucket. Point identity (series_key, timestamp) is the primary
// key; INSERT OR REPLACE makes every write last-write-wins, so rerunning a
// window overwrites instead of duplicating. One transaction per batch: the
// whole chunk is durable or none of it is.

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

use crate::error::StoreError;
use crate::models::{FieldValue, TimeRange, TransformedRecord};

/// Batched-write capability of the destination bucket. Returns only after the
/// whole batch is durable.
pub trait SinkStore {
    fn write_batch(
        &self,
        records: &[TransformedRecord],
    ) -> impl Future<Output = Result<(), StoreError>>;
}

pub struct SinkRepo {
    pool: SqlitePool,
}

impl SinkRepo {
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
            CREATE TABLE IF NOT EXISTS points (
                series_key TEXT NOT NULL,
                measurement TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                tags TEXT NOT NULL,
                fields TEXT NOT NULL,
                PRIMARY KEY (series_key, timestamp)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sink_timestamp ON points(timestamp)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Points in [range.start, range.end), ascending by (timestamp,
    /// series_key). Verification and inspection surface.
    #[instrument(skip(self), fields(repo = "sink", operation = "get_points_by_time_range", from_ts = range.start, to_ts = range.end))]
    pub async fn get_points_by_time_range(
        &self,
        range: TimeRange,
    ) -> anyhow::Result<Vec<TransformedRecord>> {
        let rows = sqlx::query(
            "SELECT series_key, measurement, timestamp, tags, fields FROM points
             WHERE timestamp >= $1 AND timestamp < $2
             ORDER BY timestamp ASC, series_key ASC",
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Self::parse_row(&row)?);
        }
        Ok(out)
    }

    pub async fn count_points(&self) -> anyhow::Result<i64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM points")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<TransformedRecord> {
        let series_key: String = row.try_get("series_key")?;
        let measurement: String = row.try_get("measurement")?;
        let timestamp: i64 = row.try_get("timestamp")?;
        let tags_json: String = row.try_get("tags")?;
        let fields_json: String = row.try_get("fields")?;

        let tags: BTreeMap<String, String> = serde_json::from_str(&tags_json)?;
        let fields: BTreeMap<String, FieldValue> = serde_json::from_str(&fields_json)?;

        Ok(TransformedRecord {
            series_key,
            measurement,
            timestamp,
            fields,
            tags,
        })
    }
}

impl SinkStore for SinkRepo {
    #[instrument(skip(self, records), fields(repo = "sink", operation = "write_batch", records_count = records.len()))]
    async fn write_batch(&self, records: &[TransformedRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        for r in records {
            let tags = serde_json::to_string(&r.tags)
                .map_err(|e| StoreError::Permanent(format!("serialize tags: {}", e)))?;
            let fields = serde_json::to_string(&r.fields)
                .map_err(|e| StoreError::Permanent(format!("serialize fields: {}", e)))?;
            sqlx::query(
                "INSERT OR REPLACE INTO points (series_key, measurement, timestamp, tags, fields) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&r.series_key)
            .bind(&r.measurement)
            .bind(r.timestamp)
            .bind(&tags)
            .bind(&fields)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        }
        tx.commit().await.map_err(StoreError::from)?;
        Ok(())
    }
}
