use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use roombook::clock::SystemClock;
use roombook::config::Config;
use roombook::engine::Engine;
use roombook::mail::LogMailer;
use roombook::scheduler::{ReminderScheduler, run_compactor};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    roombook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let clock = Arc::new(SystemClock::new(config.timezone));
    let engine = Arc::new(Engine::new(config.wal_path(), clock, config.engine_settings())?);

    if let Some(path) = &config.seed_file {
        roombook::seed::seed_from_file(&engine, path).await?;
    }

    info!("roombook started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  timezone: {}", config.timezone);
    info!("  spaces: {}", engine.space_count());
    info!("  reservations: {}", engine.reservation_count());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let scheduler = ReminderScheduler::new(engine.clone(), Arc::new(LogMailer), config.reminder.clone());
    let reminders = tokio::spawn(scheduler.run());
    let compactor = tokio::spawn(run_compactor(
        engine.clone(),
        config.compact_threshold,
        Duration::from_secs(30),
    ));

    shutdown_signal().await;
    info!("shutdown signal received");

    reminders.abort();
    compactor.abort();
    // Best effort: a long journal still replays.
    if let Err(e) = engine.compact_journal().await {
        tracing::warn!("final compaction failed: {e}");
    }

    info!("roombook stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
