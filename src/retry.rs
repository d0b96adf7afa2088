// Bounded exponential backoff shared by extraction and writes.

use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(pipeline: &PipelineConfig) -> Self {
        Self {
            max_attempts: pipeline.max_attempts,
            initial_backoff: pipeline.initial_backoff(),
            max_backoff: pipeline.max_backoff(),
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or transient failures
    /// exhaust `max_attempts`. Backoff doubles per attempt, capped at
    /// `max_backoff`.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    tracing::warn!(
                        operation,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "transient store error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
