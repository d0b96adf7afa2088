// Run coordinator: resolve -> (extract -> transform -> write -> commit)*
// -> finalize. Extraction of the next chunk overlaps the write of the
// current one (depth-2 pipeline, the only concurrency); chunks themselves
// are strictly ordered because rollup state accumulates across them.

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::checkpoint_repo::CheckpointRepo;
use crate::config::AppConfig;
use crate::error::EtlError;
use crate::extract::Extractor;
use crate::models::{ErrorEvent, RunResult, RunStatus, TimeRange};
use crate::retry::RetryPolicy;
use crate::sink_repo::SinkStore;
use crate::source_repo::SourceStore;
use crate::transform::{RollupState, TransformSpec, transform_chunk};
use crate::window::{self, WindowPlan};
use crate::write::Writer;

pub struct Runner<'a, S: SourceStore, D: SinkStore> {
    source: &'a S,
    sink: &'a D,
    checkpoints: &'a CheckpointRepo,
    config: &'a AppConfig,
    cancel: watch::Receiver<bool>,
}

impl<'a, S: SourceStore, D: SinkStore> Runner<'a, S, D> {
    pub fn new(
        source: &'a S,
        sink: &'a D,
        checkpoints: &'a CheckpointRepo,
        config: &'a AppConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            sink,
            checkpoints,
            config,
            cancel,
        }
    }

    /// Runs one window to completion. `explicit` overrides automatic
    /// window resolution (backfill of a specific range); None means "the
    /// previous calendar day, or whatever an unfinished checkpoint says".
    /// Never panics out: the returned RunResult carries the terminal status
    /// and error samples for the notifier.
    pub async fn run(&self, explicit: Option<TimeRange>) -> RunResult {
        let mut result = RunResult::new();
        match self.run_inner(explicit, &mut result).await {
            Ok(()) => {
                result.status = RunStatus::Complete;
            }
            Err(e) => {
                result.status = RunStatus::Failed;
                result.push_error(
                    ErrorEvent::new(error_kind(&e), e.to_string()),
                    self.config.pipeline.error_sample_limit,
                );
                // Leave the boundary where the last commit put it; only the
                // status changes so the next invocation knows to resume.
                if !matches!(e, EtlError::Configuration(_)) {
                    if let Err(mark_err) = self.checkpoints.mark_failed().await {
                        warn!(error = %mark_err, "could not mark checkpoint failed");
                    }
                }
                tracing::error!(error = %e, "run failed");
            }
        }
        result
    }

    async fn run_inner(
        &self,
        explicit: Option<TimeRange>,
        result: &mut RunResult,
    ) -> Result<(), EtlError> {
        let sample_limit = self.config.pipeline.error_sample_limit;
        let tz = self.config.window.tz();

        let checkpoint = self
            .checkpoints
            .load()
            .await
            .map_err(EtlError::Checkpoint)?;
        let plan = window::resolve(Utc::now(), tz, explicit, checkpoint.as_ref())?;

        let (window, start_boundary, mut state) = match plan {
            WindowPlan::UpToDate(w) => {
                info!(
                    window_start = w.start,
                    window_end = w.end,
                    "window already committed, nothing to do"
                );
                return Ok(());
            }
            WindowPlan::Fresh(w) => {
                self.checkpoints.begin(w).await.map_err(EtlError::Checkpoint)?;
                info!(window_start = w.start, window_end = w.end, "starting fresh window");
                (w, w.start, RollupState::new())
            }
            WindowPlan::Resuming { window, boundary } => {
                let agg_json = checkpoint
                    .as_ref()
                    .map(|c| c.agg_state.as_str())
                    .unwrap_or("{}");
                let state = RollupState::from_json(agg_json).map_err(|e| {
                    EtlError::Configuration(format!("corrupt checkpoint aggregation state: {}", e))
                })?;
                self.checkpoints
                    .resume()
                    .await
                    .map_err(EtlError::Checkpoint)?;
                info!(
                    window_start = window.start,
                    window_end = window.end,
                    boundary,
                    "resuming unfinished window"
                );
                (window, boundary, state)
            }
        };

        let spec = TransformSpec::from_config(&self.config.transform, tz);
        let retry = RetryPolicy::from_config(&self.config.pipeline);
        let timeout = self.config.pipeline.op_timeout();
        let mut extractor = Extractor::new(
            self.source,
            TimeRange::new(start_boundary, window.end),
            self.config.pipeline.chunk_size,
            self.config.source.measurements.clone(),
            retry.clone(),
            timeout,
        );
        let writer = Writer::new(self.sink, retry, timeout);

        let mut pending = extractor.next_chunk().await?;
        while let Some(chunk) = pending.take() {
            self.check_cancelled()?;

            let output = transform_chunk(&spec, &mut state, &chunk);
            result.records_read += chunk.len() as u64;
            result.records_skipped += output.errors.len() as u64;
            for record_error in &output.errors {
                tracing::debug!(
                    series_key = %record_error.series_key,
                    timestamp = record_error.timestamp,
                    error = %record_error.error,
                    "record skipped"
                );
                result.push_error(
                    ErrorEvent::new(
                        "transform",
                        format!(
                            "{} at {}: {}",
                            record_error.series_key, record_error.timestamp, record_error.error
                        ),
                    ),
                    sample_limit,
                );
            }
            let written = output.records.len() as u64;

            // Overlap this chunk's write with the next chunk's extraction.
            let (write_res, next_res) =
                tokio::join!(writer.write_chunk(&output.records), extractor.next_chunk());
            write_res?;
            result.records_written += written;
            result.chunks_processed += 1;

            match next_res {
                Ok(Some(next)) => {
                    self.commit(chunk.range.end, &state).await?;
                    pending = Some(next);
                }
                Ok(None) => {
                    // Final chunk: its boundary advance is folded into
                    // complete() after the rollup flush, so an in-progress
                    // checkpoint never ends up with an empty resume range.
                    pending = None;
                }
                Err(e) => {
                    // The chunk just written is durable; commit it before
                    // surfacing the extraction failure so resume skips it.
                    self.commit(chunk.range.end, &state).await?;
                    return Err(e);
                }
            }
        }

        let rollups = state.finalize();
        if !rollups.is_empty() {
            writer.write_chunk(&rollups).await?;
            result.rollups_written += rollups.len() as u64;
        }
        self.checkpoints
            .complete()
            .await
            .map_err(EtlError::Checkpoint)?;
        info!(
            records_read = result.records_read,
            records_written = result.records_written,
            records_skipped = result.records_skipped,
            rollups_written = result.rollups_written,
            chunks_processed = result.chunks_processed,
            "window committed"
        );
        Ok(())
    }

    async fn commit(&self, boundary: i64, state: &RollupState) -> Result<(), EtlError> {
        let agg = state
            .to_json()
            .map_err(|e| EtlError::Configuration(format!("serialize aggregation state: {}", e)))?;
        self.checkpoints
            .advance(boundary, &agg)
            .await
            .map_err(EtlError::Checkpoint)
    }

    fn check_cancelled(&self) -> Result<(), EtlError> {
        if *self.cancel.borrow() {
            Err(EtlError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn error_kind(e: &EtlError) -> &'static str {
    match e {
        EtlError::Configuration(_) => "config",
        EtlError::ChunkExtraction { .. } => "extract",
        EtlError::ChunkWrite { .. } => "write",
        EtlError::Checkpoint(_) => "checkpoint",
        EtlError::Cancelled => "cancelled",
    }
}
