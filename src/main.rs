//! cyclestore binary entry point

use cyclestore::scheduler::{ScheduledTask, spawn_interval};
use cyclestore::storage::{BackupTrigger, LifecycleEvent};
use cyclestore::{AppState, config};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging from `logging.level` / `logging.format`
/// 3. Initialize AppState
/// 4. Build Axum router
/// 5. Start background tasks (auto-backup, sync)
/// 6. Serve until Ctrl-C, then take an unload backup
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging from the `logging` section
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.default_filter().into());
    if config.logging.is_json() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting cyclestore...");
    tracing::info!(
        database = %config.database.path.display(),
        cycle = %config.cycle.default,
        sync_enabled = config.sync.enabled,
        "Configuration loaded"
    );

    // 3. Initialize metrics
    cyclestore::metrics::init_metrics();

    // 4. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 5. Build Axum router
    let app = cyclestore::build_router(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // 6. Start background tasks
    let mut tasks = Vec::new();
    if config.backup.enabled {
        tasks.push(spawn_backup_task(state.clone()));
    }
    if config.sync.enabled {
        tasks.push(spawn_sync_task(state.clone()));
    }

    // Start server
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");
    for task in tasks {
        task.cancel().await;
    }

    let report = state
        .backup
        .handle_lifecycle(LifecycleEvent::Unload, &state.default_context())
        .await;
    tracing::info!(
        backup_id = ?report.backup_id,
        fallback_key = ?report.fallback_key,
        "Unload backup taken"
    );

    state.store.database().close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
    }
}

/// Spawn the periodic auto-backup task
fn spawn_backup_task(state: AppState) -> ScheduledTask {
    let period = Duration::from_secs(state.config.backup.interval_seconds);
    spawn_interval("auto-backup", period, move || {
        let state = state.clone();
        async move {
            let context = state.default_context();
            if let Some(metadata) = state
                .backup
                .create_auto_backup(&context, BackupTrigger::Interval)
                .await
            {
                tracing::debug!(backup_id = %metadata.id, "Auto-backup completed");
            }
        }
    })
}

/// Spawn the periodic sync task
fn spawn_sync_task(state: AppState) -> ScheduledTask {
    let period = Duration::from_secs(state.config.sync.interval_seconds);
    spawn_interval("sync", period, move || {
        let state = state.clone();
        async move {
            let context = state.default_context();
            let outcome = state.sync.run_scheduled(&context).await;
            tracing::debug!(?outcome, "Scheduled sync finished");
        }
    })
}
