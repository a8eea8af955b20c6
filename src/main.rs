use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use daybook::config::Config;
use daybook::engine::Engine;
use daybook::notify::NotifyHub;
use daybook::payment::SandboxProcessor;
use daybook::watcher;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    daybook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let payments = Arc::new(SandboxProcessor::new());
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        notify,
        payments,
        config.policy.clone(),
    )?);

    info!("daybook started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  vehicles: {}", engine.vehicle_count());
    info!("  sweep_interval: {:?}", config.sweep_interval);
    info!("  approval_window: {}h", config.policy.approval_window_ms / 3_600_000);
    info!("  service_fee: {} bps", config.policy.service_fee_bps);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher_task = tokio::spawn(watcher::run_deadline_watcher(
        engine.clone(),
        config.sweep_interval,
        shutdown_rx.clone(),
    ));
    let compactor_task = tokio::spawn(watcher::run_compactor(
        engine.clone(),
        config.compact_threshold,
        shutdown_rx,
    ));

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received, stopping background tasks");
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(watcher_task, compactor_task);

    // Leave a compact log behind so the next start replays quickly
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("daybook stopped");
    Ok(())
}
