use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Failed,
}

/// One recorded error. `kind` matches the taxonomy ("transform", "extract",
/// "write", "checkpoint", "config", "cancelled").
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub kind: &'static str,
    pub message: String,
    pub timestamp_ms: i64,
}

impl ErrorEvent {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Terminal summary of one run. Serialized to a JSON log line at run end;
/// the external notifier forwards it, the core knows nothing of transport.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub records_read: u64,
    pub records_written: u64,
    /// Records dropped by per-record transform errors.
    pub records_skipped: u64,
    /// Finalized rollup points flushed at window end (not in records_written).
    pub rollups_written: u64,
    pub chunks_processed: u64,
    /// Total error count; `errors` holds only the first N samples.
    pub errors_total: u64,
    pub errors: Vec<ErrorEvent>,
}

impl RunResult {
    pub fn new() -> Self {
        Self {
            status: RunStatus::Failed,
            records_read: 0,
            records_written: 0,
            records_skipped: 0,
            rollups_written: 0,
            chunks_processed: 0,
            errors_total: 0,
            errors: Vec::new(),
        }
    }

    /// Tallies an error, keeping at most `sample_limit` events.
    pub fn push_error(&mut self, event: ErrorEvent, sample_limit: usize) {
        self.errors_total += 1;
        if self.errors.len() < sample_limit {
            self.errors.push(event);
        }
    }
}

impl Default for RunResult {
    fn default() -> Self {
        Self::new()
    }
}
