use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::TimeRange;

/// Scalar field value. The value space of the source bucket's points.
/// Untagged: JSON round-trips as the bare scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Numeric view for aggregation. Text that parses as a number counts
    /// (sensor states often arrive as strings); booleans do not.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
            FieldValue::Boolean(_) => None,
        }
    }
}

/// Canonical series key: measurement plus the sorted tag set, line-protocol
/// style. Deterministic for a given (measurement, tags) pair.
pub fn series_key(measurement: &str, tags: &BTreeMap<String, String>) -> String {
    let mut key = String::from(measurement);
    for (k, v) in tags {
        key.push(',');
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    key
}

/// One point as read from the source bucket. Immutable once read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub series_key: String,
    pub measurement: String,
    /// Epoch millis, UTC.
    pub timestamp: i64,
    pub fields: BTreeMap<String, FieldValue>,
    pub tags: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new(
        measurement: impl Into<String>,
        timestamp: i64,
        fields: BTreeMap<String, FieldValue>,
        tags: BTreeMap<String, String>,
    ) -> Self {
        let measurement = measurement.into();
        let series_key = series_key(&measurement, &tags);
        Self {
            series_key,
            measurement,
            timestamp,
            fields,
            tags,
        }
    }
}

/// One point destined for the sink bucket. Point identity is
/// `(series_key, timestamp)`: the sink overwrites on identity collision, so
/// rewriting the same logical point is a no-op in effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedRecord {
    pub series_key: String,
    pub measurement: String,
    /// Epoch millis, UTC.
    pub timestamp: i64,
    pub fields: BTreeMap<String, FieldValue>,
    pub tags: BTreeMap<String, String>,
}

impl TransformedRecord {
    pub fn new(
        measurement: impl Into<String>,
        timestamp: i64,
        fields: BTreeMap<String, FieldValue>,
        tags: BTreeMap<String, String>,
    ) -> Self {
        let measurement = measurement.into();
        let series_key = series_key(&measurement, &tags);
        Self {
            series_key,
            measurement,
            timestamp,
            fields,
            tags,
        }
    }
}

/// A bounded, contiguous slice of the window. Records sorted by
/// (timestamp, series_key); `range` is the sub-range this chunk covers, so
/// `range.end` is a sound checkpoint boundary (chunks never split a
/// timestamp).
#[derive(Debug, Clone)]
pub struct Chunk {
    pub records: Vec<RawRecord>,
    pub range: TimeRange,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
