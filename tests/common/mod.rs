// Shared test helpers

use sensor_etl::config::AppConfig;
use sensor_etl::models::{FieldValue, RawRecord};
use std::collections::BTreeMap;
use std::path::Path;

/// 2024-01-01T00:00:00Z
pub const DAY_START: i64 = 1_704_067_200_000;
/// 2024-01-02T00:00:00Z
pub const DAY_END: i64 = 1_704_153_600_000;

pub fn test_config(dir: &Path, chunk_size: usize) -> AppConfig {
    let toml = format!(
        r#"
[source]
path = "{source}"

[sink]
path = "{sink}"

[checkpoint]
path = "{checkpoint}"

[window]
timezone = "UTC"

[pipeline]
chunk_size = {chunk_size}
max_attempts = 3
initial_backoff_ms = 1
max_backoff_ms = 5
op_timeout_secs = 5

[transform]
version = "v1"
"#,
        source = dir.join("source.db").display(),
        sink = dir.join("sink.db").display(),
        checkpoint = dir.join("checkpoint.db").display(),
        chunk_size = chunk_size,
    );
    AppConfig::load_from_str(&toml).expect("test config")
}

/// One sensor reading with a numeric "value" field.
pub fn reading(measurement: &str, ts: i64, value: f64) -> RawRecord {
    let mut fields = BTreeMap::new();
    fields.insert("value".to_string(), FieldValue::Float(value));
    let mut tags = BTreeMap::new();
    tags.insert("entity_id".to_string(), measurement.to_string());
    RawRecord::new(measurement, ts, fields, tags)
}

/// One-minute samples for a whole day: `minutes` readings starting at
/// `day_start`, values deterministic per (measurement offset, minute).
pub fn minute_readings(measurement: &str, day_start: i64, minutes: i64, base: f64) -> Vec<RawRecord> {
    (0..minutes)
        .map(|m| reading(measurement, day_start + m * 60_000, base + m as f64 * 0.25))
        .collect()
}
