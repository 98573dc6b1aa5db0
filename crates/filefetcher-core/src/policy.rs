//! The per-(datalogger, day) finished predicate.
//!
//! Pure decision logic: no clocks are read here, the sweep passes in the
//! elapsed run time and the current wall-clock time it observed.

use std::time::Duration;

use chrono::{Days, NaiveDate, NaiveTime};
use tracing::{debug, info};

use crate::config::{Datalogger, RunLimits};

/// The result of one transfer attempt. Transient, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The output file already existed; no network call was made.
    AlreadyPresent,
    /// The file was retrieved and published.
    Fetched,
    /// A recoverable transfer error; the day may succeed on a later run.
    TransientFailure,
    /// An unclassified transfer error.
    FatalFailure,
}

impl FetchOutcome {
    pub fn is_fetch_ok(self) -> bool {
        matches!(self, FetchOutcome::AlreadyPresent | FetchOutcome::Fetched)
    }
}

/// Decide whether a datalogger still needs more days processed.
///
/// Evaluated once per (datalogger, day) attempt. A datalogger is finished
/// when the day's fetch succeeded and the backfill cutoff is satisfied, or
/// when any hard floor fires: the backfill cutoff itself, the
/// minimum-lookback window, the global run time, or the daily shutdown time.
/// The floors apply regardless of transfer success so a permanently missing
/// remote file cannot drive an unbounded historical crawl.
///
/// A failed transfer does not retire the datalogger on its own; the sweep
/// moves on to the next earlier day and only the floors bound it.
pub fn finished(
    logger: &Datalogger,
    limits: &RunLimits,
    day: NaiveDate,
    today: NaiveDate,
    outcome: FetchOutcome,
    elapsed: Duration,
    wall: NaiveTime,
) -> bool {
    let fetch_ok = outcome.is_fetch_ok();

    // A configured cutoff is also a floor: once the cursor reaches it the
    // datalogger retires even when the last day did not transfer.
    let (backfill_satisfied, cutoff_reached) = match logger.backfill {
        None => (true, false),
        Some(cutoff) if day > cutoff => {
            debug!(logger = %logger.name, %day, %cutoff, "continuing to backfill");
            (false, false)
        }
        Some(cutoff) => {
            info!(logger = %logger.name, %day, %cutoff, "completed backfill");
            (true, true)
        }
    };

    // With the cursor starting at yesterday, a lookback of N fires after
    // exactly N attempted days.
    let lookback_reached = logger
        .minimum_lookback
        .is_some_and(|days| day <= today - Days::new(u64::from(days)));

    let run_time_exceeded = limits.max_run_time.is_some_and(|max| elapsed > max);
    if run_time_exceeded {
        info!(logger = %logger.name, ?elapsed, "maxRunTime exceeded");
    }

    let shutdown_reached = limits.shutdown_time.is_some_and(|at| wall > at);
    if shutdown_reached {
        info!(logger = %logger.name, %wall, "shutdownTime reached");
    }

    (fetch_ok && backfill_satisfied)
        || cutoff_reached
        || lookback_reached
        || run_time_exceeded
        || shutdown_reached
}
