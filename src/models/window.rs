use serde::{Deserialize, Serialize};

/// Half-open `[start, end)` range in epoch millis UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    InProgress,
    Complete,
    Failed,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::InProgress => "in_progress",
            CheckpointStatus::Complete => "complete",
            CheckpointStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(CheckpointStatus::InProgress),
            "complete" => Some(CheckpointStatus::Complete),
            "failed" => Some(CheckpointStatus::Failed),
            _ => None,
        }
    }
}

/// Durable progress marker. `boundary` is the watermark: data in
/// `[window.start, boundary)` is committed in the sink. `agg_state` is the
/// serialized rollup accumulator as of the boundary; it advances atomically
/// with the boundary so a resumed run continues window-level aggregation
/// where the previous attempt left off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub window: TimeRange,
    pub boundary: i64,
    pub status: CheckpointStatus,
    pub agg_state: String,
    /// Epoch millis of the last update.
    pub updated_at: i64,
}
