//! cyclestore - cycle-isolated local persistence with backup, restore and sync
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Partition CRUD, settings, users                          │
//! │  - Snapshot export/import, backups, lifecycle               │
//! │  - Sync status and sync hub endpoints                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌──────────────────────┬──────────────────┬───────────────────┐
//! │    BackupManager     │     Snapshot     │  SyncCoordinator  │
//! │  - bounded history   │  - export        │  - single flight  │
//! │  - fallback copies   │  - import        │  - last writer    │
//! │  - file exports      │  - checksum      │    wins           │
//! └──────────────────────┴──────────────────┴───────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx), one namespace per (store, cycle, user)    │
//! │  - Change events, collection cache (moka)                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Backup and sync are independent readers of the same store; there is no
//! transaction boundary between them.
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `data`: Database, partitions, records, events and cache
//! - `snapshot`: Snapshot document, export/import, checksum
//! - `storage`: Backup manager, fallback store, file exports
//! - `sync`: Sync coordinator, remote client, sync hub
//! - `scheduler`: Cancellable interval tasks
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod snapshot;
pub mod storage;
pub mod sync;

use std::sync::Arc;
use std::time::Duration;

/// Application state shared across all handlers
///
/// This struct is cloned for each request and contains
/// shared resources like the store, backup manager and sync coordinator.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,
    /// Partitioned record store
    pub store: Arc<data::Store>,
    /// Backup manager
    pub backup: Arc<storage::BackupManager>,
    /// Sync coordinator talking to `sync.server_url`
    pub sync: Arc<sync::SyncCoordinator<sync::HttpSyncRemote>>,
    /// Server side of the sync contract
    pub hub: Arc<sync::SyncHub>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Initialize collection cache and store
    /// 3. Initialize backup manager
    /// 4. Initialize sync coordinator and hub
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = data::Database::connect(&config.database.path).await?;

        // 2. Initialize cache and store
        let cache = data::CollectionCache::new(
            config.cache.max_entries,
            Duration::from_secs(config.cache.ttl_seconds),
        );
        let store = data::Store::new(db, cache);
        tracing::info!("Store initialized");

        // 3. Initialize backup manager
        let backup = storage::BackupManager::new(Arc::clone(&store), &config);
        tracing::info!("Backup manager initialized");

        // 4. Initialize sync
        let client_id = sync::resolve_client_id(&store, config.sync.client_id.as_deref()).await?;
        let remote = sync::HttpSyncRemote::new(&config.sync.server_url)?;
        let coordinator =
            sync::SyncCoordinator::new(Arc::clone(&store), remote, client_id, &config.sync);
        let hub = sync::SyncHub::new(Arc::clone(&store));
        tracing::info!(client_id = %coordinator.client_id(), "Sync initialized");

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            store,
            backup: Arc::new(backup),
            sync: Arc::new(coordinator),
            hub: Arc::new(hub),
        })
    }

    /// Cycle context for a request
    ///
    /// Missing values fall back to the configured default cycle and user.
    pub fn context(
        &self,
        cycle: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<data::CycleContext, error::AppError> {
        let cycle = cycle.unwrap_or(&self.config.cycle.default);
        let user_id = user_id.or(self.config.cycle.user_id.as_deref());
        data::CycleContext::parse(cycle, user_id)
    }

    /// Context used by background tasks
    pub fn default_context(&self) -> data::CycleContext {
        self.config.default_context()
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{
        compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
        trace::TraceLayer,
    };

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest("/api", api::api_router())
        .merge(api::metrics_router())
        .layer(axum::extract::DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(api::MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

