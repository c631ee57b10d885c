//! Sync coordinator
//!
//! Best-effort, last-writer-wins reconciliation of one cycle's snapshot
//! with a remote. Only whole-snapshot timestamps are compared, so
//! concurrent edits to different partitions on different clients can be
//! lost. Nothing else in the crate depends on sync succeeding: failures
//! are kept in the status and never returned to callers.
//!
//! # Algorithm
//! 1. Export the local snapshot
//! 2. Upload it
//! 3. Download the remote snapshot
//! 4. Import it when its timestamp is newer, otherwise re-upload the local one

mod hub;
mod remote;

pub use hub::SyncHub;
pub use remote::{HttpSyncRemote, SyncRemote, SyncRequest, SyncResponse};

use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;

use crate::config::SyncConfig;
use crate::data::{CycleContext, Store};
use crate::error::AppError;
use crate::metrics::SYNC_ATTEMPTS_TOTAL;
use crate::snapshot::{export_snapshot, import_snapshot};

const META_NAMESPACE: &str = "meta";
const CLIENT_ID_KEY: &str = "clientId";

/// Observable sync state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    /// Completion time of the last successful sync, in milliseconds
    pub last_sync: Option<i64>,
    pub pending_changes: bool,
    pub sync_in_progress: bool,
    /// Message of the last failure; cleared by the next success
    pub error: Option<String>,
}

/// Result of one sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Offline, or another sync was already running
    Skipped,
    /// Local snapshot was the newer one and was re-uploaded
    Uploaded,
    /// Remote snapshot was newer and was imported
    Imported,
    Failed,
}

impl SyncOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, SyncOutcome::Uploaded | SyncOutcome::Imported)
    }

    fn as_str(self) -> &'static str {
        match self {
            SyncOutcome::Skipped => "skipped",
            SyncOutcome::Uploaded => "uploaded",
            SyncOutcome::Imported => "imported",
            SyncOutcome::Failed => "failed",
        }
    }
}

/// Clears the single-flight flag when a sync ends, even if its future is dropped
struct InFlight<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Sync coordinator
pub struct SyncCoordinator<R> {
    store: Arc<Store>,
    remote: R,
    client_id: String,
    status: watch::Sender<SyncStatus>,
    in_flight: AtomicBool,
    /// Store write generation covered by the last successful sync
    synced_generation: AtomicU64,
    max_retries: u32,
    retry_delay: Duration,
}

impl<R: SyncRemote> SyncCoordinator<R> {
    pub fn new(store: Arc<Store>, remote: R, client_id: String, config: &SyncConfig) -> Self {
        let (status, _) = watch::channel(SyncStatus {
            is_online: true,
            ..SyncStatus::default()
        });

        Self {
            store,
            remote,
            client_id,
            status,
            in_flight: AtomicBool::new(false),
            synced_generation: AtomicU64::new(0),
            max_retries: config.max_retries,
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn pending_changes(&self) -> bool {
        self.store.write_generation() != self.synced_generation.load(Ordering::SeqCst)
    }

    /// Current status
    pub fn status(&self) -> SyncStatus {
        let mut status = self.status.borrow().clone();
        status.pending_changes = self.pending_changes();
        status
    }

    /// Receive every status change
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    fn publish(&self, update: impl FnOnce(&mut SyncStatus)) {
        let pending = self.pending_changes();
        self.status.send_modify(|status| {
            update(status);
            status.pending_changes = pending;
        });
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    /// Record connectivity; true when this flips offline → online
    fn update_online(&self, online: bool) -> bool {
        let was_online = self.status.borrow().is_online;
        if was_online != online {
            tracing::info!(online, "Connectivity changed");
            self.publish(|status| status.is_online = online);
        }
        online && !was_online
    }

    /// Apply a connectivity signal; regaining connectivity syncs immediately
    ///
    /// Going offline leaves an in-flight sync to finish or fail on its own.
    pub async fn set_online(&self, online: bool, context: &CycleContext) -> SyncOutcome {
        if self.update_online(online) {
            return self.sync_data(context).await;
        }
        SyncOutcome::Skipped
    }

    /// Probe the remote and record the result
    pub async fn check_connectivity(&self) -> bool {
        let online = match self.remote.health().await {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!(%error, "Connectivity probe failed");
                false
            }
        };
        self.update_online(online);
        online
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Run one sync unless offline or already syncing
    ///
    /// A call made while another sync is running returns `Skipped` at once
    /// without contacting the remote.
    pub async fn sync_data(&self, context: &CycleContext) -> SyncOutcome {
        if !self.status.borrow().is_online {
            return self.finish(SyncOutcome::Skipped);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Sync already in progress");
            return self.finish(SyncOutcome::Skipped);
        }
        let _in_flight = InFlight {
            flag: &self.in_flight,
        };

        self.publish(|status| status.sync_in_progress = true);
        let result = self.reconcile(context).await;

        let outcome = match result {
            Ok(outcome) => {
                self.publish(|status| {
                    status.sync_in_progress = false;
                    status.last_sync = Some(Utc::now().timestamp_millis());
                    status.error = None;
                });
                tracing::info!(
                    outcome = outcome.as_str(),
                    cycle = %context.cycle(),
                    "Sync completed"
                );
                outcome
            }
            Err(error) => {
                tracing::warn!(%error, cycle = %context.cycle(), "Sync failed");
                let message = error.to_string();
                self.publish(|status| {
                    status.sync_in_progress = false;
                    status.error = Some(message);
                });
                SyncOutcome::Failed
            }
        };
        self.finish(outcome)
    }

    fn finish(&self, outcome: SyncOutcome) -> SyncOutcome {
        SYNC_ATTEMPTS_TOTAL
            .with_label_values(&[outcome.as_str()])
            .inc();
        outcome
    }

    async fn reconcile(&self, context: &CycleContext) -> Result<SyncOutcome, AppError> {
        let generation = self.store.write_generation();
        let local = export_snapshot(&self.store, context).await?;
        let local_timestamp = local.timestamp.unwrap_or_default();
        let request = SyncRequest {
            data: local,
            timestamp: local_timestamp,
            client_id: self.client_id.clone(),
        };

        self.remote.upload(&request).await?.into_result()?;
        let remote = self.remote.download().await?.into_result()?;

        let remote_timestamp = remote
            .data
            .as_ref()
            .and_then(|snapshot| snapshot.timestamp)
            .or(remote.timestamp);

        match (remote.data, remote_timestamp) {
            (Some(snapshot), Some(remote_timestamp)) if remote_timestamp > local_timestamp => {
                import_snapshot(&self.store, &snapshot, None, context).await?;
                self.synced_generation
                    .store(self.store.write_generation(), Ordering::SeqCst);
                Ok(SyncOutcome::Imported)
            }
            _ => {
                self.remote.upload(&request).await?.into_result()?;
                self.synced_generation.store(generation, Ordering::SeqCst);
                Ok(SyncOutcome::Uploaded)
            }
        }
    }

    /// Re-check connectivity, then sync on demand
    pub async fn force_sync(&self, context: &CycleContext) -> bool {
        if !self.check_connectivity().await {
            self.publish(|status| status.error = Some("remote unreachable".to_string()));
            return false;
        }
        self.sync_data(context).await.is_success()
    }

    /// Body of the periodic sync task
    ///
    /// Offline ticks only probe connectivity. A failed attempt is retried
    /// up to `max_retries` times, `retry_delay` apart.
    pub async fn run_scheduled(&self, context: &CycleContext) -> SyncOutcome {
        let online = self.status.borrow().is_online;
        if !online && !self.check_connectivity().await {
            return SyncOutcome::Skipped;
        }

        let mut attempt = 0;
        loop {
            let outcome = self.sync_data(context).await;
            if outcome != SyncOutcome::Failed || attempt >= self.max_retries {
                return outcome;
            }
            attempt += 1;
            tracing::debug!(attempt, max_retries = self.max_retries, "Retrying sync");
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

// =============================================================================
// Client id
// =============================================================================

/// Configured client id, or the persisted one, generating it on first use
pub async fn resolve_client_id(
    store: &Arc<Store>,
    configured: Option<&str>,
) -> Result<String, AppError> {
    if let Some(id) = configured.map(str::trim).filter(|id| !id.is_empty()) {
        return Ok(id.to_string());
    }

    let meta = store.system(META_NAMESPACE);
    if let Some(Value::String(id)) = meta.get(CLIENT_ID_KEY).await? {
        return Ok(id);
    }

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    let id = format!("client_{}_{suffix}", Utc::now().timestamp_millis());
    meta.set(CLIENT_ID_KEY, &Value::String(id.clone())).await?;

    tracing::info!(client_id = %id, "Generated sync client id");
    Ok(id)
}
