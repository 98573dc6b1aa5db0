//! The per-queue backfill sweep.
//!
//! One sweep owns a day cursor that starts at yesterday (UTC) and walks
//! backward one day per round. Every datalogger still in the active set is
//! offered the day before the cursor advances; a datalogger leaves the set
//! only when the finished predicate says so.

use std::time::Instant;

use chrono::{Days, Local, Utc};
use tracing::{debug, info};

use filefetcher_core::{Datalogger, Queue, RunLimits, policy};
use filefetcher_fetch::Transfer;

/// Logs queue completion on drop, so the record is emitted even when the
/// sweep unwinds mid-loop.
struct SweepGuard {
    queue: String,
}

impl Drop for SweepGuard {
    fn drop(&mut self) {
        info!(queue = %self.queue, "all done with queue");
    }
}

/// Run one queue to completion.
///
/// Side effects only: files land on disk, progress goes to the log. Errors
/// in one datalogger never abort a sibling.
pub async fn sweep<T: Transfer>(
    queue: &Queue,
    limits: &RunLimits,
    transfer: &T,
    started: Instant,
) {
    let _guard = SweepGuard {
        queue: queue.name.clone(),
    };

    let mut active: Vec<&Datalogger> = queue
        .dataloggers
        .iter()
        .filter(|logger| {
            if logger.disabled {
                debug!(queue = %queue.name, logger = %logger.name, "skipping disabled datalogger");
                false
            } else {
                true
            }
        })
        .collect();

    let mut day = Utc::now().date_naive();
    while !active.is_empty() {
        day = day - Days::new(1);
        let today = Utc::now().date_naive();

        // Iterate a snapshot and build the next round's set explicitly, so
        // a retirement never skips or double-visits a sibling.
        let mut still_active = Vec::with_capacity(active.len());
        for logger in active {
            let outcome = transfer.attempt(logger, day).await;
            let done = policy::finished(
                logger,
                limits,
                day,
                today,
                outcome,
                started.elapsed(),
                Local::now().time(),
            );
            if done {
                info!(queue = %queue.name, logger = %logger.name, "all done with logger");
            } else {
                still_active.push(logger);
            }
        }
        active = still_active;
    }
}
