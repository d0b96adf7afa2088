// Domain models (ported from the original Python job)

mod record;
mod run;
mod window;

pub use record::{Chunk, FieldValue, RawRecord, TransformedRecord, series_key};
pub use run::{ErrorEvent, RunResult, RunStatus};
pub use window::{Checkpoint, CheckpointStatus, TimeRange};
