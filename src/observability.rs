use std::net::SocketAddr;

use crate::service::BookingError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking operations. Labels: op, outcome.
pub const OPERATIONS_TOTAL: &str = "roomlock_operations_total";

/// Histogram: booking operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "roomlock_operation_duration_seconds";

/// Counter: creates that passed the read-only pre-check but lost the race
/// at the atomic insert.
pub const RACES_LOST_TOTAL: &str = "roomlock_races_lost_total";

/// Counter: retries of transient store failures. Labels: op.
pub const STORE_RETRIES_TOTAL: &str = "roomlock_store_retries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: reservations moved to COMPLETED by the sweeper.
pub const RESERVATIONS_COMPLETED_TOTAL: &str = "roomlock_reservations_completed_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomlock_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomlock_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short outcome label for an operation result.
pub fn outcome_label<T>(result: &Result<T, BookingError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    }
}
