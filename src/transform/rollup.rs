// Daily rollup accumulator. Carried across chunks as an explicit value and
// persisted with each checkpoint advance, so a resumed run picks up the
// partial aggregates instead of recomputing the committed prefix.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{FieldValue, TransformedRecord};

/// Running aggregate for one (series, local day). Mean is Welford's running
/// mean: error stays bounded over a full day of points, unlike sum/count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayAggregate {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub count: u64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub last_ts: i64,
    pub last: f64,
}

impl DayAggregate {
    fn new(record: &TransformedRecord, value: f64) -> Self {
        Self {
            measurement: record.measurement.clone(),
            tags: record.tags.clone(),
            count: 1,
            mean: value,
            min: value,
            max: value,
            last_ts: record.timestamp,
            last: value,
        }
    }

    fn observe(&mut self, timestamp: i64, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        if timestamp >= self.last_ts {
            self.last_ts = timestamp;
            self.last = value;
        }
    }
}

/// Accumulator for the whole window, keyed by series then day-bucket start.
/// Serializes to the checkpoint's agg_state column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollupState {
    #[serde(default)]
    by_series: BTreeMap<String, BTreeMap<i64, DayAggregate>>,
}

impl RollupState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, record: &TransformedRecord, bucket_start: i64, value: f64) {
        self.by_series
            .entry(record.series_key.clone())
            .or_default()
            .entry(bucket_start)
            .and_modify(|agg| agg.observe(record.timestamp, value))
            .or_insert_with(|| DayAggregate::new(record, value));
    }

    pub fn is_empty(&self) -> bool {
        self.by_series.is_empty()
    }

    /// Emits one rollup point per (series, day): `<measurement>_daily` at the
    /// bucket start, with count/min/max/mean/last fields. Output order is
    /// deterministic (sorted by series, then bucket).
    pub fn finalize(self) -> Vec<TransformedRecord> {
        let mut out = Vec::new();
        for (_series, buckets) in self.by_series {
            for (bucket_start, agg) in buckets {
                let mut fields = BTreeMap::new();
                fields.insert("count".into(), FieldValue::Integer(agg.count as i64));
                fields.insert("min".into(), FieldValue::Float(agg.min));
                fields.insert("max".into(), FieldValue::Float(agg.max));
                fields.insert("mean".into(), FieldValue::Float(agg.mean));
                fields.insert("last".into(), FieldValue::Float(agg.last));
                out.push(TransformedRecord::new(
                    format!("{}_daily", agg.measurement),
                    bucket_start,
                    fields,
                    agg.tags,
                ));
            }
        }
        out
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        if s.is_empty() || s == "{}" {
            return Ok(Self::default());
        }
        serde_json::from_str(s)
    }
}
