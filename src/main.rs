//! Lighthouse daemon entry point.

use std::sync::Arc;

use log::{error, info};
use serde_json::json;
use tokio::signal;

use lighthouse::config::Config;
use lighthouse::history::HistoryLog;
use lighthouse::notify::LogNotifier;
use lighthouse::{DockerRuntime, Engine, Scheduler, SettingsStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!(
        "Starting Lighthouse (settings: {}, history: {})",
        cfg.settings_path.display(),
        cfg.history_path.display()
    );

    // Container Runtime (Docker)
    let runtime = DockerRuntime::connect(cfg.docker_socket.as_deref(), cfg.stop_timeout_secs)?;

    // Shared state
    let settings = Arc::new(SettingsStore::load(cfg.settings_path.clone()).await);
    if let Some(token) = &cfg.webhook_token {
        settings.update(json!({ "webhook_token": token })).await?;
    }
    let history =
        Arc::new(HistoryLog::load(cfg.history_path.clone(), cfg.history_max_entries).await);
    let notifier = Arc::new(LogNotifier::new(settings.clone()));

    let engine = Arc::new(Engine::new(Arc::new(runtime), settings, history, notifier));

    // Periodic checks
    let scheduler = Scheduler::new(engine);
    scheduler.start().await;

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    scheduler.shutdown().await;

    info!("Shutdown complete.");
    Ok(())
}
