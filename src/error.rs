// Error taxonomy for the pipeline. Per-record transform errors are absorbed
// and tallied; store errors are classified transient/permanent at the seam.

use crate::models::TimeRange;

/// Fatal pipeline errors. Anything surfacing as `EtlError` aborts the run;
/// the checkpoint stays at the last committed boundary for resume.
#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    /// Invalid window or config. Never retried.
    #[error("configuration: {0}")]
    Configuration(String),

    /// Source store gave up after retries. Carries the failed sub-range.
    #[error("extraction failed for [{}, {}): {source}", .range.start, .range.end)]
    ChunkExtraction {
        range: TimeRange,
        #[source]
        source: StoreError,
    },

    /// Destination store gave up after retries or rejected the batch.
    #[error("write of {records} records failed: {source}")]
    ChunkWrite {
        records: usize,
        #[source]
        source: StoreError,
    },

    /// Checkpoint persistence unavailable. Fatal: losing resume state risks
    /// duplicate or missed processing.
    #[error("checkpoint store: {0}")]
    Checkpoint(#[source] StoreError),

    /// External interrupt observed at a chunk boundary.
    #[error("run cancelled")]
    Cancelled,
}

/// Store-level error with retry classification.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => {
                StoreError::Transient(e.to_string())
            }
            sqlx::Error::Database(db) => {
                // SQLITE_BUSY (5) / SQLITE_LOCKED (6) clear on their own.
                let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
                if code == "5" || code == "6" {
                    StoreError::Transient(e.to_string())
                } else {
                    StoreError::Permanent(e.to_string())
                }
            }
            _ => StoreError::Permanent(e.to_string()),
        }
    }
}

/// Per-record transform failure. Recovered locally: the record is skipped and
/// counted, never fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("missing field {0:?}")]
    MissingField(String),
    #[error("non-numeric value in field {field:?}: {value}")]
    NonNumeric { field: String, value: String },
}
