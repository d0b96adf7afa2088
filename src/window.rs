// Window resolution: which [start, end) range this run processes.
// All zone math for the pipeline lives here.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::EtlError;
use crate::models::{Checkpoint, CheckpointStatus, TimeRange};

/// Resolved plan for a run. Resume is an explicit variant, not inferred from
/// nullable fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowPlan {
    /// Process the whole window from scratch.
    Fresh(TimeRange),
    /// Continue a prior attempt: data in [window.start, boundary) is already
    /// committed; only [boundary, window.end) remains.
    Resuming { window: TimeRange, boundary: i64 },
    /// A completed checkpoint already covers this window; nothing to do.
    UpToDate(TimeRange),
}

/// Picks the window for this run.
///
/// An in-progress (or failed) checkpoint resumes its own window - correctness
/// would survive a restart either way, but resuming skips remote I/O for
/// chunks already committed. An explicit range that disagrees with the
/// checkpoint's window wins and starts fresh. With no checkpoint and no
/// explicit range, the window is the previous full calendar day in `tz`.
pub fn resolve(
    now_utc: DateTime<Utc>,
    tz: Tz,
    explicit: Option<TimeRange>,
    checkpoint: Option<&Checkpoint>,
) -> Result<WindowPlan, EtlError> {
    let target = match explicit {
        Some(range) => {
            if range.is_empty() {
                return Err(EtlError::Configuration(format!(
                    "explicit window is empty or inverted: [{}, {})",
                    range.start, range.end
                )));
            }
            range
        }
        None => previous_day(now_utc, tz)?,
    };

    match checkpoint {
        Some(cp)
            if matches!(
                cp.status,
                CheckpointStatus::InProgress | CheckpointStatus::Failed
            ) =>
        {
            if explicit.is_some() && cp.window != target {
                return Ok(WindowPlan::Fresh(target));
            }
            if cp.window.is_empty() || cp.boundary < cp.window.start || cp.boundary >= cp.window.end
            {
                return Err(EtlError::Configuration(format!(
                    "corrupt checkpoint: boundary {} outside window [{}, {})",
                    cp.boundary, cp.window.start, cp.window.end
                )));
            }
            Ok(WindowPlan::Resuming {
                window: cp.window,
                boundary: cp.boundary,
            })
        }
        Some(cp) if cp.status == CheckpointStatus::Complete && cp.window == target => {
            Ok(WindowPlan::UpToDate(target))
        }
        _ => Ok(WindowPlan::Fresh(target)),
    }
}

/// The previous full calendar day in `tz`, as a UTC epoch-millis range.
pub fn previous_day(now_utc: DateTime<Utc>, tz: Tz) -> Result<TimeRange, EtlError> {
    let today = now_utc.with_timezone(&tz).date_naive();
    let yesterday = today.pred_opt().ok_or_else(|| {
        EtlError::Configuration(format!("no previous day before {}", today))
    })?;
    let start = local_midnight_utc_ms(yesterday, tz)?;
    let end = local_midnight_utc_ms(today, tz)?;
    if start >= end {
        return Err(EtlError::Configuration(format!(
            "resolved window is empty or inverted: [{}, {})",
            start, end
        )));
    }
    Ok(TimeRange::new(start, end))
}

/// Start of the local calendar day containing `ts_ms`, as UTC epoch millis.
/// Used as the rollup bucket key.
pub fn day_bucket_start(ts_ms: i64, tz: Tz) -> i64 {
    let date = match Utc.timestamp_millis_opt(ts_ms).single() {
        Some(dt) => dt.with_timezone(&tz).date_naive(),
        None => return ts_ms,
    };
    local_midnight_utc_ms(date, tz).unwrap_or(ts_ms)
}

/// Local midnight of `date` converted to UTC millis. A DST fold takes the
/// earlier instant; a gap (no local midnight) falls forward to the first
/// valid local time.
fn local_midnight_utc_ms(date: NaiveDate, tz: Tz) -> Result<i64, EtlError> {
    let naive = date.and_time(NaiveTime::MIN);
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return Ok(dt.with_timezone(&Utc).timestamp_millis());
    }
    for minutes in (15..=180).step_by(15) {
        let probe = naive + TimeDelta::minutes(minutes);
        if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
            return Ok(dt.with_timezone(&Utc).timestamp_millis());
        }
    }
    Err(EtlError::Configuration(format!(
        "no valid local midnight for {} in {}",
        date, tz
    )))
}
