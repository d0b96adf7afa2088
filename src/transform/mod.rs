// Chunk transformation: config-driven field mapping per record, plus a
// daily rollup accumulator threaded through the run (see rollup.rs).
// Pure with respect to chunk boundaries: same chunk + same accumulator
// state always produces the same output.

pub mod rollup;

pub use rollup::{DayAggregate, RollupState};

use chrono_tz::Tz;
use std::collections::BTreeMap;

use crate::config::{MapRule, TransformConfig};
use crate::error::TransformError;
use crate::models::{Chunk, FieldValue, RawRecord, TransformedRecord};
use crate::window::day_bucket_start;

/// Resolved transform configuration: mapping rules indexed by measurement,
/// pipeline-wide tags, and the reference zone for day buckets.
#[derive(Debug, Clone)]
pub struct TransformSpec {
    pub version: String,
    pub scenario: Option<String>,
    pub rollup_field: String,
    pub tz: Tz,
    rules: BTreeMap<String, MapRule>,
}

impl TransformSpec {
    pub fn from_config(config: &TransformConfig, tz: Tz) -> Self {
        let rules = config
            .map
            .iter()
            .map(|r| (r.measurement.clone(), r.clone()))
            .collect();
        Self {
            version: config.version.clone(),
            scenario: config.scenario.clone(),
            rollup_field: config.rollup_field.clone(),
            tz,
            rules,
        }
    }

    fn rule_for(&self, measurement: &str) -> Option<&MapRule> {
        self.rules.get(measurement)
    }
}

/// A record the transformer had to drop, with enough context to report it.
#[derive(Debug)]
pub struct RecordError {
    pub series_key: String,
    pub timestamp: i64,
    pub error: TransformError,
}

/// Output of one chunk pass.
#[derive(Debug, Default)]
pub struct ChunkOutput {
    pub records: Vec<TransformedRecord>,
    pub errors: Vec<RecordError>,
}

/// Maps one chunk of raw records and feeds the rollup accumulator. Malformed
/// records are reported and skipped, never fatal.
pub fn transform_chunk(spec: &TransformSpec, state: &mut RollupState, chunk: &Chunk) -> ChunkOutput {
    let mut out = ChunkOutput {
        records: Vec::with_capacity(chunk.len()),
        errors: Vec::new(),
    };

    for record in &chunk.records {
        match transform_record(spec, record) {
            Ok((transformed, value)) => {
                let bucket = day_bucket_start(transformed.timestamp, spec.tz);
                state.observe(&transformed, bucket, value);
                out.records.push(transformed);
            }
            Err(error) => {
                out.errors.push(RecordError {
                    series_key: record.series_key.clone(),
                    timestamp: record.timestamp,
                    error,
                });
            }
        }
    }

    out
}

/// One record through the stateless stage. Returns the output point and the
/// numeric value that feeds the rollup.
fn transform_record(
    spec: &TransformSpec,
    record: &RawRecord,
) -> Result<(TransformedRecord, f64), TransformError> {
    let rule = spec.rule_for(&record.measurement);
    let field_name = rule.map(|r| r.field.as_str()).unwrap_or(&spec.rollup_field);

    let raw_value = record
        .fields
        .get(field_name)
        .ok_or_else(|| TransformError::MissingField(field_name.to_string()))?;
    let value = raw_value.as_f64().ok_or_else(|| TransformError::NonNumeric {
        field: field_name.to_string(),
        value: format!("{:?}", raw_value),
    })?;

    let scaled = value * rule.and_then(|r| r.scale).unwrap_or(1.0);

    let out_field = rule
        .and_then(|r| r.rename_field.as_deref())
        .unwrap_or(field_name);
    let out_measurement = rule
        .and_then(|r| r.rename_measurement.as_deref())
        .unwrap_or(&record.measurement);

    let mut fields = BTreeMap::new();
    fields.insert(out_field.to_string(), FieldValue::Float(scaled));

    let mut tags = record.tags.clone();
    tags.insert("version".into(), spec.version.clone());
    if let Some(scenario) = &spec.scenario {
        tags.insert("scenario".into(), scenario.clone());
    }
    if let Some(unit) = rule.and_then(|r| r.unit.as_deref()) {
        tags.insert("unit".into(), unit.to_string());
    }

    Ok((
        TransformedRecord::new(out_measurement, record.timestamp, fields, tags),
        scaled,
    ))
}
