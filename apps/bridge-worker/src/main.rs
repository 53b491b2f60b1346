//! # Channel Bridge Worker
//!
//! Runs the outbox scheduler until Ctrl+C or SIGTERM.
//!
//! ```text
//! bridge-worker [CONFIG_PATH]
//!
//!   CONFIG_PATH   bridge.toml to load; defaults to the per-user config dir
//!   RUST_LOG      log filter, default "info"
//!   BRIDGE_*      overrides for individual settings
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bridge_db::{Database, DbConfig};
use bridge_sync::{BridgeConfig, BridgeEngine, ConfigSource, Operator, ReloadingConfig, StaticConfig, SystemClock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("Starting channel bridge worker...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let (config, reloader) = config_source(config_path)?;
    let current = config.current();
    info!(
        active = current.is_active(),
        batch_size = current.integration.batch_size,
        poll_interval_secs = current.integration.poll_interval_secs,
        "Configuration loaded"
    );

    let db = Database::new(DbConfig::new(current.database.path.clone()))
        .await
        .with_context(|| format!("opening database {}", current.database.path.display()))?;
    info!(path = %current.database.path.display(), "Database ready");

    let engine = BridgeEngine::new(&db, config.clone(), Arc::new(SystemClock))?;
    let (scheduler_task, scheduler) = engine.spawn_scheduler();
    let cleanup_task = tokio::spawn(run_cleanup(engine.operator().clone(), config));

    shutdown_signal().await;

    if let Err(e) = scheduler.shutdown().await {
        warn!(error = %e, "Scheduler already stopped");
    }
    scheduler_task.await.context("scheduler task panicked")?;
    cleanup_task.abort();
    if let Some(reloader) = reloader {
        reloader.abort();
    }
    db.close().await;

    info!("Worker shutdown complete");
    Ok(())
}

/// Reloads from the file when there is one, otherwise uses defaults plus env.
fn config_source(
    path: Option<PathBuf>,
) -> anyhow::Result<(Arc<dyn ConfigSource>, Option<JoinHandle<()>>)> {
    match path.or_else(BridgeConfig::default_config_path) {
        Some(path) if path.exists() => {
            let source = Arc::new(
                ReloadingConfig::new(path.clone())
                    .with_context(|| format!("loading {}", path.display()))?,
            );
            let reloader = source.spawn_reloader();
            let source: Arc<dyn ConfigSource> = source;
            Ok((source, Some(reloader)))
        }
        _ => {
            warn!("No config file found, using defaults and environment");
            let source: Arc<dyn ConfigSource> = Arc::new(StaticConfig::new(BridgeConfig::load(None)?));
            Ok((source, None))
        }
    }
}

/// Deletes finished items older than `cleanup_after_days`, once a day.
async fn run_cleanup(operator: Operator, config: Arc<dyn ConfigSource>) {
    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let days = config.current().integration.cleanup_after_days;
        if let Err(e) = operator.cleanup(days).await {
            error!(error = %e, "Outbox cleanup failed");
        }
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping scheduler...");
}
