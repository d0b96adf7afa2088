// SourceRepo + Extractor tests: ordering, keyset pagination, chunk
// partitioning at timestamp boundaries, extraction retry behavior.

mod common;

use common::{DAY_START, reading, test_config};
use sensor_etl::error::{EtlError, StoreError};
use sensor_etl::extract::Extractor;
use sensor_etl::models::{RawRecord, TimeRange};
use sensor_etl::retry::RetryPolicy;
use sensor_etl::source_repo::{PageCursor, SourceRepo, SourceStore};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;

async fn seeded_repo(dir: &TempDir, records: &[RawRecord]) -> SourceRepo {
    let path = dir.path().join("source.db");
    let repo = SourceRepo::connect(path.to_str().unwrap()).await.unwrap();
    repo.init().await.unwrap();
    repo.insert_points(records).await.unwrap();
    repo
}

fn three_series_minutes(minutes: i64) -> Vec<RawRecord> {
    let mut records = Vec::new();
    for m in 0..minutes {
        for series in ["sensor.a", "sensor.b", "sensor.c"] {
            records.push(reading(series, DAY_START + m * 60_000, m as f64));
        }
    }
    records
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn fetch_page_orders_by_timestamp_then_series_key() {
    let dir = TempDir::new().unwrap();
    // Inserted deliberately out of order.
    let records = vec![
        reading("sensor.b", DAY_START + 60_000, 2.0),
        reading("sensor.a", DAY_START, 0.0),
        reading("sensor.a", DAY_START + 60_000, 1.0),
        reading("sensor.b", DAY_START, 3.0),
    ];
    let repo = seeded_repo(&dir, &records).await;

    let range = TimeRange::new(DAY_START, DAY_START + 120_000);
    let page = repo.fetch_page(range, None, 100, &[]).await.unwrap();
    let keys: Vec<(i64, &str)> = page
        .iter()
        .map(|r| (r.timestamp, r.series_key.as_str()))
        .collect();
    assert_eq!(
        keys,
        vec![
            (DAY_START, "sensor.a,entity_id=sensor.a"),
            (DAY_START, "sensor.b,entity_id=sensor.b"),
            (DAY_START + 60_000, "sensor.a,entity_id=sensor.a"),
            (DAY_START + 60_000, "sensor.b,entity_id=sensor.b"),
        ]
    );
}

#[tokio::test]
async fn fetch_page_range_is_half_open() {
    let dir = TempDir::new().unwrap();
    let records = vec![
        reading("sensor.a", DAY_START, 1.0),
        reading("sensor.a", DAY_START + 60_000, 2.0),
    ];
    let repo = seeded_repo(&dir, &records).await;

    let range = TimeRange::new(DAY_START, DAY_START + 60_000);
    let page = repo.fetch_page(range, None, 100, &[]).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].timestamp, DAY_START);
}

#[tokio::test]
async fn fetch_page_cursor_resumes_strictly_after() {
    let dir = TempDir::new().unwrap();
    let records = three_series_minutes(4);
    let repo = seeded_repo(&dir, &records).await;
    let range = TimeRange::new(DAY_START, DAY_START + 240_000);

    let mut all = Vec::new();
    let mut cursor: Option<PageCursor> = None;
    loop {
        let page = repo.fetch_page(range, cursor.as_ref(), 5, &[]).await.unwrap();
        if page.is_empty() {
            break;
        }
        let last = page.last().unwrap();
        cursor = Some(PageCursor {
            timestamp: last.timestamp,
            series_key: last.series_key.clone(),
        });
        all.extend(page);
    }

    assert_eq!(all.len(), 12);
    // No duplicates: identity of (timestamp, series_key) appears once.
    let mut seen: Vec<(i64, String)> = all
        .iter()
        .map(|r| (r.timestamp, r.series_key.clone()))
        .collect();
    seen.dedup();
    assert_eq!(seen.len(), 12);
}

#[tokio::test]
async fn fetch_page_filters_measurements() {
    let dir = TempDir::new().unwrap();
    let records = three_series_minutes(2);
    let repo = seeded_repo(&dir, &records).await;
    let range = TimeRange::new(DAY_START, DAY_START + 120_000);

    let page = repo
        .fetch_page(range, None, 100, &["sensor.b".to_string()])
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert!(page.iter().all(|r| r.measurement == "sensor.b"));
}

#[tokio::test]
async fn extractor_partitions_range_without_splitting_timestamps() {
    let dir = TempDir::new().unwrap();
    let records = three_series_minutes(10); // 30 records, 3 per timestamp
    let repo = seeded_repo(&dir, &records).await;
    let range = TimeRange::new(DAY_START, DAY_START + 600_000);

    let mut extractor = Extractor::new(&repo, range, 8, vec![], fast_retry(), Duration::from_secs(5));
    let mut chunks = Vec::new();
    while let Some(chunk) = extractor.next_chunk().await.unwrap() {
        chunks.push(chunk);
    }

    assert!(chunks.len() > 1);
    // Contiguous partition of the full range.
    assert_eq!(chunks.first().unwrap().range.start, range.start);
    assert_eq!(chunks.last().unwrap().range.end, range.end);
    for pair in chunks.windows(2) {
        assert_eq!(pair[0].range.end, pair[1].range.start);
    }
    // Every record inside its chunk's sub-range; no timestamp in two chunks.
    let mut total = 0;
    let mut last_ts = i64::MIN;
    for chunk in &chunks {
        for r in &chunk.records {
            assert!(chunk.range.contains(r.timestamp));
            assert!(r.timestamp >= last_ts);
        }
        last_ts = chunk.records.last().unwrap().timestamp;
        total += chunk.len();
    }
    assert_eq!(total, 30);
}

#[tokio::test]
async fn extractor_empty_range_yields_no_chunks() {
    let dir = TempDir::new().unwrap();
    let repo = seeded_repo(&dir, &[]).await;
    let range = TimeRange::new(DAY_START, DAY_START + 600_000);

    let mut extractor = Extractor::new(&repo, range, 8, vec![], fast_retry(), Duration::from_secs(5));
    assert!(extractor.next_chunk().await.unwrap().is_none());
    assert!(extractor.next_chunk().await.unwrap().is_none());
}

/// Source that fails with transient errors N times before delegating.
struct FlakySource<'a> {
    inner: &'a SourceRepo,
    failures_left: AtomicU32,
}

impl<'a> SourceStore for FlakySource<'a> {
    async fn fetch_page(
        &self,
        range: TimeRange,
        after: Option<&PageCursor>,
        limit: usize,
        measurements: &[String],
    ) -> Result<Vec<RawRecord>, StoreError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Transient("injected outage".into()));
        }
        self.inner.fetch_page(range, after, limit, measurements).await
    }
}

#[tokio::test]
async fn extractor_retries_transient_source_errors() {
    let dir = TempDir::new().unwrap();
    let records = three_series_minutes(2);
    let repo = seeded_repo(&dir, &records).await;
    let flaky = FlakySource {
        inner: &repo,
        failures_left: AtomicU32::new(2),
    };
    let range = TimeRange::new(DAY_START, DAY_START + 120_000);

    let mut extractor =
        Extractor::new(&flaky, range, 100, vec![], fast_retry(), Duration::from_secs(5));
    let chunk = extractor.next_chunk().await.unwrap().unwrap();
    assert_eq!(chunk.len(), 6);
}

#[tokio::test]
async fn extractor_surfaces_chunk_extraction_error_after_retries() {
    let dir = TempDir::new().unwrap();
    let records = three_series_minutes(2);
    let repo = seeded_repo(&dir, &records).await;
    let flaky = FlakySource {
        inner: &repo,
        failures_left: AtomicU32::new(10),
    };
    let range = TimeRange::new(DAY_START, DAY_START + 120_000);

    let mut extractor =
        Extractor::new(&flaky, range, 100, vec![], fast_retry(), Duration::from_secs(5));
    let err = extractor.next_chunk().await.unwrap_err();
    match err {
        EtlError::ChunkExtraction { range: failed, .. } => {
            assert_eq!(failed, range);
        }
        other => panic!("expected ChunkExtraction, got {:?}", other),
    }
}

#[tokio::test]
async fn test_config_builds_valid_config() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), 480);
    assert_eq!(config.pipeline.chunk_size, 480);
    assert_eq!(config.window.timezone, "UTC");
}
