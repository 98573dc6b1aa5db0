//! One isolated worker per enabled queue.
//!
//! Workers share no mutable memory; the filesystem is the only shared state,
//! and the engine's presence check keeps interleaved runs convergent. A
//! panicking worker is contained by its task and logged; siblings keep
//! running. No results are aggregated: a queue's outcome is visible only in
//! its own log records.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use filefetcher_core::Config;
use filefetcher_fetch::Transfer;

use crate::sweep;

/// Start a sweep worker for every enabled queue and wait for all of them.
pub async fn run_all<T>(config: Arc<Config>, transfer: Arc<T>, started: Instant)
where
    T: Transfer + Send + Sync + 'static,
{
    let limits = config.limits();

    let mut workers = Vec::new();
    for (index, queue) in config.queues.iter().enumerate() {
        if queue.disabled {
            info!(queue = %queue.name, "queue is disabled, skipping it");
            continue;
        }
        let config = Arc::clone(&config);
        let transfer = Arc::clone(&transfer);
        let handle = tokio::spawn(async move {
            sweep::sweep(&config.queues[index], &limits, transfer.as_ref(), started).await;
        });
        workers.push((queue.name.clone(), handle));
    }

    for (name, handle) in workers {
        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                error!(queue = %name, "queue worker panicked");
            }
            Err(e) => {
                error!(queue = %name, error = %e, "queue worker failed");
            }
        }
    }
}
