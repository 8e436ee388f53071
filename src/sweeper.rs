use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::engine::Engine;
use crate::observability;

/// One pass: persist `Completed` for every active reservation that has ended.
/// Returns how many were moved.
pub async fn sweep_once(engine: &Engine, now: i64, timeout: Duration) -> usize {
    let mut completed = 0;
    for id in engine.collect_elapsed(now) {
        match engine.complete_reservation(id, now, timeout).await {
            Ok(()) => {
                debug!("completed reservation {id}");
                completed += 1;
            }
            // Cancelled in the meantime, or the ledgers were busy; next pass retries.
            Err(e) => debug!("sweeper skip {id}: {e}"),
        }
    }
    if completed > 0 {
        metrics::counter!(observability::RESERVATIONS_COMPLETED_TOTAL).increment(completed as u64);
        info!("sweeper completed {completed} reservations");
    }
    completed
}

/// Background task that periodically marks elapsed reservations completed.
pub async fn run_sweeper(engine: Arc<Engine>, clock: Arc<dyn Clock>, every: Duration, timeout: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&engine, clock.now(), timeout).await;
    }
}

/// Compact the WAL once at least `threshold` appends have accumulated.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            warn!("WAL compaction after {appends} appends failed: {e}");
            false
        }
    }
}

/// Background task that keeps the WAL bounded.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}
