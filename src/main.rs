use std::sync::Arc;

use tracing::info;

use roomlock::clock::{Clock, SystemClock};
use roomlock::config::Config;
use roomlock::engine::Engine;
use roomlock::seed::Seed;
use roomlock::service::BookingService;
use roomlock::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    roomlock::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(Engine::new(config.wal_path())?);
    let seed = match &config.seed_file {
        Some(path) => Seed::load(path)?,
        None => Seed::default(),
    };
    let (directory, identities) = seed.into_parts();
    info!(
        "loaded {} reservations, {} rooms, {} identities",
        engine.reservation_count(),
        directory.len(),
        identities.len()
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = BookingService::new(
        engine.clone(),
        Arc::new(directory),
        Arc::new(identities),
        clock.clone(),
        config.service,
    );

    let sweeper_task = tokio::spawn(sweeper::run_sweeper(
        engine.clone(),
        clock,
        config.sweep_interval,
        config.service.store_timeout,
    ));
    let compactor_task = tokio::spawn(sweeper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.sweep_interval,
    ));

    info!("roomlock ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!(
        "  business hours: {:02}:00-{:02}:00 (utc offset {} min)",
        config.service.business_hours.open_hour,
        config.service.business_hours.close_hour,
        config.service.business_hours.utc_offset_ms / roomlock::model::MINUTE_MS
    );
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Built for embedders that call it in-process; this binary exposes no transport.
    let _service = service;
    shutdown_signal().await?;
    info!("shutdown signal received");

    sweeper_task.abort();
    compactor_task.abort();
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("roomlock stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r,
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
