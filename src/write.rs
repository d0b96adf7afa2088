// Chunk delivery to the sink. Durability is all-or-nothing per batch (the
// sink transaction), so a retried or re-run chunk overwrites by point
// identity instead of duplicating.

use std::time::Duration;

use crate::error::{EtlError, StoreError};
use crate::models::TransformedRecord;
use crate::retry::RetryPolicy;
use crate::sink_repo::SinkStore;

pub struct Writer<'a, D: SinkStore> {
    sink: &'a D,
    retry: RetryPolicy,
    timeout: Duration,
}

impl<'a, D: SinkStore> Writer<'a, D> {
    pub fn new(sink: &'a D, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            sink,
            retry,
            timeout,
        }
    }

    /// Writes one batch, retrying transient sink failures. Success means the
    /// whole batch is durable; on error nothing of it is committed and the
    /// caller may re-issue the batch safely.
    pub async fn write_chunk(&self, records: &[TransformedRecord]) -> Result<(), EtlError> {
        if records.is_empty() {
            return Ok(());
        }
        self.retry
            .run("write_batch", || async {
                match tokio::time::timeout(self.timeout, self.sink.write_batch(records)).await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Transient(format!(
                        "write_batch timed out after {:?}",
                        self.timeout
                    ))),
                }
            })
            .await
            .map_err(|source| EtlError::ChunkWrite {
                records: records.len(),
                source,
            })
    }
}
