// SinkRepo tests: point-identity overwrite semantics, batch atomicity surface

use sensor_etl::models::{FieldValue, TimeRange, TransformedRecord};
use sensor_etl::sink_repo::{SinkRepo, SinkStore};
use std::collections::BTreeMap;
use tempfile::TempDir;

const TS: i64 = 1_704_067_200_000;

fn point(measurement: &str, ts: i64, value: f64) -> TransformedRecord {
    let mut fields = BTreeMap::new();
    fields.insert("value".to_string(), FieldValue::Float(value));
    let mut tags = BTreeMap::new();
    tags.insert("version".to_string(), "v1".to_string());
    TransformedRecord::new(measurement, ts, fields, tags)
}

async fn repo(dir: &TempDir) -> SinkRepo {
    let path = dir.path().join("sink.db");
    let repo = SinkRepo::connect(path.to_str().unwrap()).await.unwrap();
    repo.init().await.unwrap();
    repo
}

#[tokio::test]
async fn write_batch_and_read_back() {
    let dir = TempDir::new().unwrap();
    let sink = repo(&dir).await;

    let batch = vec![
        point("sensor.a", TS, 1.0),
        point("sensor.b", TS, 2.0),
        point("sensor.a", TS + 60_000, 3.0),
    ];
    sink.write_batch(&batch).await.unwrap();

    assert_eq!(sink.count_points().await.unwrap(), 3);
    let points = sink
        .get_points_by_time_range(TimeRange::new(TS, TS + 120_000))
        .await
        .unwrap();
    assert_eq!(points.len(), 3);
    assert_eq!(points[0].timestamp, TS);
    assert_eq!(points[2].timestamp, TS + 60_000);
}

#[tokio::test]
async fn same_identity_same_value_is_effective_noop() {
    let dir = TempDir::new().unwrap();
    let sink = repo(&dir).await;

    let batch = vec![point("sensor.a", TS, 1.0)];
    sink.write_batch(&batch).await.unwrap();
    sink.write_batch(&batch).await.unwrap();

    assert_eq!(sink.count_points().await.unwrap(), 1);
    let points = sink
        .get_points_by_time_range(TimeRange::new(TS, TS + 1))
        .await
        .unwrap();
    assert_eq!(points[0].fields.get("value"), Some(&FieldValue::Float(1.0)));
}

#[tokio::test]
async fn same_identity_new_value_overwrites() {
    let dir = TempDir::new().unwrap();
    let sink = repo(&dir).await;

    sink.write_batch(&[point("sensor.a", TS, 1.0)]).await.unwrap();
    sink.write_batch(&[point("sensor.a", TS, 9.0)]).await.unwrap();

    assert_eq!(sink.count_points().await.unwrap(), 1);
    let points = sink
        .get_points_by_time_range(TimeRange::new(TS, TS + 1))
        .await
        .unwrap();
    assert_eq!(points[0].fields.get("value"), Some(&FieldValue::Float(9.0)));
}

#[tokio::test]
async fn different_tags_are_different_identities() {
    let dir = TempDir::new().unwrap();
    let sink = repo(&dir).await;

    let a = point("sensor.a", TS, 1.0);
    let mut tags = BTreeMap::new();
    tags.insert("version".to_string(), "v2".to_string());
    let b = TransformedRecord::new("sensor.a", TS, a.fields.clone(), tags);

    sink.write_batch(&[a, b]).await.unwrap();
    assert_eq!(sink.count_points().await.unwrap(), 2);
}

#[tokio::test]
async fn empty_batch_is_noop() {
    let dir = TempDir::new().unwrap();
    let sink = repo(&dir).await;
    sink.write_batch(&[]).await.unwrap();
    assert_eq!(sink.count_points().await.unwrap(), 0);
}
