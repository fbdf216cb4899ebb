use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tablebook::clock::SystemClock;
use tablebook::config::{self, Config};
use tablebook::engine::Engine;
use tablebook::notify::{self, NotifyHub};
use tablebook::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    tablebook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let hub = Arc::new(NotifyHub::new());
    let delivery = tokio::spawn(notify::run_delivery_log(hub.subscribe()));

    let engine = Arc::new(Engine::new(
        config.wal_path(),
        config.admission_policy,
        Arc::new(SystemClock),
        hub.clone(),
    )?);

    if let Some(seed) = &config.seed_file {
        if engine.restaurant_count() == 0 {
            let created = engine.seed_restaurants(config::load_seed(seed)?).await?;
            info!("seeded {} restaurants from {}", created.len(), seed.display());
        }
    }

    info!("tablebook started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  admission policy: {:?}", config.admission_policy);
    info!(
        "  sweep every {:?}, grace period {:?}",
        config.sweep_interval, config.grace_period
    );
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let shutdown = CancellationToken::new();
    let sweeper_task = tokio::spawn(sweeper::run_sweeper(
        engine.clone(),
        config.sweep_interval,
        config.grace_period,
        shutdown.clone(),
    ));
    let compactor_task = tokio::spawn(sweeper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.compact_interval,
        shutdown.clone(),
    ));

    wait_for_signal().await;
    info!("shutdown signal received, stopping background tasks");
    shutdown.cancel();
    let _ = tokio::join!(sweeper_task, compactor_task);

    engine.compact_wal().await?;
    drop(engine);
    drop(hub);
    let _ = delivery.await;

    info!("tablebook stopped");
    Ok(())
}

async fn wait_for_signal() {
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
