// Source bucket access. One bucket = one SQLite file with a points table;
// tags/fields are JSON columns. Keyset pagination on (timestamp, series_key)
// gives the extractor a monotonic, resumable ordering key.

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

use crate::error::StoreError;
use crate::models::{FieldValue, RawRecord, TimeRange};

/// Resume point within an ordered range scan: strictly after this
/// (timestamp, series_key) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub timestamp: i64,
    pub series_key: String,
}

/// Range-query capability of the source bucket. One page per call, ordered by
/// (timestamp, series_key) ascending.
pub trait SourceStore {
    fn fetch_page(
        &self,
        range: TimeRange,
        after: Option<&PageCursor>,
        limit: usize,
        measurements: &[String],
    ) -> impl Future<Output = Result<Vec<RawRecord>, StoreError>>;
}

pub struct SourceRepo {
    pool: SqlitePool,
}

impl SourceRepo {
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
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                series_key TEXT NOT NULL,
                measurement TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                tags TEXT NOT NULL,
                fields TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_points_ts_series ON points(timestamp, series_key)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts raw points (fixture seeding, backfill tooling).
    #[instrument(skip(self, records), fields(repo = "source", operation = "insert_points", records_count = records.len()))]
    pub async fn insert_points(&self, records: &[RawRecord]) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for r in records {
            let tags = serde_json::to_string(&r.tags)?;
            let fields = serde_json::to_string(&r.fields)?;
            sqlx::query(
                "INSERT INTO points (series_key, measurement, timestamp, tags, fields) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&r.series_key)
            .bind(&r.measurement)
            .bind(r.timestamp)
            .bind(&tags)
            .bind(&fields)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<RawRecord, StoreError> {
        let series_key: String = row.try_get("series_key").map_err(StoreError::from)?;
        let measurement: String = row.try_get("measurement").map_err(StoreError::from)?;
        let timestamp: i64 = row.try_get("timestamp").map_err(StoreError::from)?;
        let tags_json: String = row.try_get("tags").map_err(StoreError::from)?;
        let fields_json: String = row.try_get("fields").map_err(StoreError::from)?;

        let tags: BTreeMap<String, String> = serde_json::from_str(&tags_json)
            .map_err(|e| StoreError::Permanent(format!("corrupt tags column: {}", e)))?;
        let fields: BTreeMap<String, FieldValue> = serde_json::from_str(&fields_json)
            .map_err(|e| StoreError::Permanent(format!("corrupt fields column: {}", e)))?;

        Ok(RawRecord {
            series_key,
            measurement,
            timestamp,
            fields,
            tags,
        })
    }
}

impl SourceStore for SourceRepo {
    #[instrument(skip(self, after, measurements), fields(repo = "source", operation = "fetch_page", from_ts = range.start, to_ts = range.end))]
    async fn fetch_page(
        &self,
        range: TimeRange,
        after: Option<&PageCursor>,
        limit: usize,
        measurements: &[String],
    ) -> Result<Vec<RawRecord>, StoreError> {
        let mut sql = String::from(
            "SELECT series_key, measurement, timestamp, tags, fields FROM points \
             WHERE timestamp >= ? AND timestamp < ?",
        );
        if after.is_some() {
            sql.push_str(" AND (timestamp > ? OR (timestamp = ? AND series_key > ?))");
        }
        if !measurements.is_empty() {
            let placeholders = vec!["?"; measurements.len()].join(", ");
            sql.push_str(&format!(" AND measurement IN ({})", placeholders));
        }
        sql.push_str(" ORDER BY timestamp ASC, series_key ASC LIMIT ?");

        let mut query = sqlx::query(&sql).bind(range.start).bind(range.end);
        if let Some(cursor) = after {
            query = query
                .bind(cursor.timestamp)
                .bind(cursor.timestamp)
                .bind(&cursor.series_key);
        }
        for m in measurements {
            query = query.bind(m);
        }
        query = query.bind(limit as i64);

        let rows = query.fetch_all(&self.pool).await.map_err(StoreError::from)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Self::parse_row(&row)?);
        }
        Ok(out)
    }
}
