//! Snapshot backups
//!
//! Handles automatic and manual backups of one cycle.
//! Backups live in their own namespace of the record table: the snapshot
//! under `backup_<millis>` and its metadata under `backup_<millis>_metadata`.
//! At most `retention_count` backups are kept; the oldest are evicted first.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::MonotonicClock;
use super::export::FileExporter;
use super::fallback::{FallbackEntry, FallbackStore};
use crate::config::AppConfig;
use crate::data::{CycleContext, PartitionHandle, Store};
use crate::error::AppError;
use crate::metrics::{BACKUPS_RETAINED, BACKUPS_TOTAL, RESTORES_TOTAL};
use crate::snapshot::{
    ImportSummary, Snapshot, SnapshotDocument, export_snapshot, import_snapshot, parse_document,
};

const BACKUP_NAMESPACE: &str = "backups";
const BACKUP_PREFIX: &str = "backup_";
const METADATA_SUFFIX: &str = "_metadata";

/// Metadata stored beside every backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    /// Creation time in milliseconds since the epoch
    pub timestamp: i64,
    pub cycle: String,
    /// Serialized snapshot length in bytes
    pub size: usize,
    pub version: String,
}

/// What caused a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupTrigger {
    Interval,
    Hidden,
    Unload,
    Manual,
    PreImport,
}

impl BackupTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupTrigger::Interval => "interval",
            BackupTrigger::Hidden => "hidden",
            BackupTrigger::Unload => "unload",
            BackupTrigger::Manual => "manual",
            BackupTrigger::PreImport => "pre_import",
        }
    }
}

/// Host lifecycle signals that trigger unattended backups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    /// The client went to the background
    Hidden,
    /// The client or daemon is going away
    Unload,
}

/// Result of a manual backup
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualBackupReport {
    pub backup: BackupMetadata,
    pub fallback_key: String,
    pub export_path: PathBuf,
}

/// What a lifecycle event managed to save
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleReport {
    pub backup_id: Option<String>,
    pub fallback_key: Option<String>,
}

/// Backup manager
///
/// Owns the bounded backup history plus the fallback and export copies.
pub struct BackupManager {
    store: Arc<Store>,
    fallback: FallbackStore,
    exporter: FileExporter,
    retention_count: usize,
    version: String,
    clock: MonotonicClock,
    /// Set once the clock has been moved past every stored backup id
    clock_seeded: OnceCell<()>,
}

impl BackupManager {
    pub fn new(store: Arc<Store>, config: &AppConfig) -> Self {
        Self {
            store,
            fallback: FallbackStore::new(&config.fallback, &config.export.app_name),
            exporter: FileExporter::new(config),
            retention_count: config.backup.retention_count,
            version: config.backup.version.clone(),
            clock: MonotonicClock::default(),
            clock_seeded: OnceCell::new(),
        }
    }

    fn namespace(&self) -> PartitionHandle {
        self.store.system(BACKUP_NAMESPACE)
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Export the cycle and store it as a new backup
    ///
    /// A failed create leaves earlier backups untouched.
    pub async fn create_backup(
        &self,
        context: &CycleContext,
        trigger: BackupTrigger,
    ) -> Result<BackupMetadata, AppError> {
        let snapshot = export_snapshot(&self.store, context).await?;
        self.store_backup(context, &snapshot, trigger).await
    }

    async fn store_backup(
        &self,
        context: &CycleContext,
        snapshot: &Snapshot,
        trigger: BackupTrigger,
    ) -> Result<BackupMetadata, AppError> {
        match self.write_backup(context, snapshot).await {
            Ok(metadata) => {
                BACKUPS_TOTAL
                    .with_label_values(&[trigger.as_str(), "success"])
                    .inc();

                if let Err(error) = self.evict_old_backups().await {
                    tracing::warn!(%error, "Failed to evict old backups");
                }

                tracing::info!(
                    backup_id = %metadata.id,
                    cycle = %metadata.cycle,
                    size = metadata.size,
                    trigger = trigger.as_str(),
                    "Backup created"
                );
                Ok(metadata)
            }
            Err(error) => {
                BACKUPS_TOTAL
                    .with_label_values(&[trigger.as_str(), "failure"])
                    .inc();
                Err(error)
            }
        }
    }

    async fn write_backup(
        &self,
        context: &CycleContext,
        snapshot: &Snapshot,
    ) -> Result<BackupMetadata, AppError> {
        let timestamp = self.next_backup_millis().await?;
        let id = format!("{BACKUP_PREFIX}{timestamp}");
        let data = serde_json::to_value(snapshot)?;

        let metadata = BackupMetadata {
            id: id.clone(),
            timestamp,
            cycle: context.cycle().to_string(),
            size: serde_json::to_string(&data)?.len(),
            version: self.version.clone(),
        };

        let namespace = self.namespace();
        namespace.set(&id, &data).await?;
        if let Err(error) = namespace
            .set(&format!("{id}{METADATA_SUFFIX}"), &serde_json::to_value(&metadata)?)
            .await
        {
            let _ = namespace.remove(&id).await;
            return Err(error);
        }

        Ok(metadata)
    }

    /// Timestamp for a new backup id, later than every retained backup
    ///
    /// The first call reads the stored history, so a wall clock that stepped
    /// back across a restart cannot reproduce an existing id.
    async fn next_backup_millis(&self) -> Result<i64, AppError> {
        self.clock_seeded
            .get_or_try_init(|| async {
                if let Some(newest) = self.list_backups().await?.first() {
                    self.clock.observe(newest.timestamp);
                }
                Ok::<_, AppError>(())
            })
            .await?;
        Ok(self.clock.next_millis())
    }

    /// Best-effort backup for unattended triggers; failures are only logged
    pub async fn create_auto_backup(
        &self,
        context: &CycleContext,
        trigger: BackupTrigger,
    ) -> Option<BackupMetadata> {
        match self.create_backup(context, trigger).await {
            Ok(metadata) => Some(metadata),
            Err(error) => {
                tracing::error!(
                    %error,
                    cycle = %context.cycle(),
                    trigger = trigger.as_str(),
                    "Auto-backup failed"
                );
                None
            }
        }
    }

    /// Backup record, fallback copy and full export, run concurrently
    ///
    /// Succeeds only when all three succeed; the first failure is returned.
    pub async fn manual_backup(
        &self,
        context: &CycleContext,
    ) -> Result<ManualBackupReport, AppError> {
        let snapshot = export_snapshot(&self.store, context).await?;

        let (backup, fallback_key, export_path) = tokio::try_join!(
            self.store_backup(context, &snapshot, BackupTrigger::Manual),
            self.fallback.save(&snapshot),
            self.exporter.write(snapshot.clone()),
        )
        .inspect_err(|error| tracing::error!(%error, "Manual backup failed"))?;

        Ok(ManualBackupReport {
            backup,
            fallback_key,
            export_path,
        })
    }

    // =========================================================================
    // Query
    // =========================================================================

    /// Retained backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<BackupMetadata>, AppError> {
        let mut backups = Vec::new();
        let mut malformed = 0_usize;
        self.namespace()
            .iterate(|key, value| {
                if key.ends_with(METADATA_SUFFIX) {
                    match serde_json::from_value::<BackupMetadata>(value.clone()) {
                        Ok(metadata) => backups.push(metadata),
                        Err(_) => malformed += 1,
                    }
                }
                std::ops::ControlFlow::Continue(())
            })
            .await?;

        if malformed > 0 {
            tracing::warn!(malformed, "Skipped malformed backup metadata");
        }

        // Sort by timestamp descending
        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(backups)
    }

    /// Stored snapshot of one backup
    pub async fn get_backup(&self, id: &str) -> Result<Snapshot, AppError> {
        if !id.starts_with(BACKUP_PREFIX) || id.ends_with(METADATA_SUFFIX) {
            return Err(AppError::SnapshotNotFound(id.to_string()));
        }

        let data = self
            .namespace()
            .get(id)
            .await?
            .ok_or_else(|| AppError::SnapshotNotFound(id.to_string()))?;
        Ok(serde_json::from_value(data)?)
    }

    /// Delete backups beyond the retention count
    ///
    /// Keeps the most recent `retention_count` backups.
    async fn evict_old_backups(&self) -> Result<usize, AppError> {
        let backups = self.list_backups().await?;
        let namespace = self.namespace();

        let mut evicted = 0;
        if backups.len() > self.retention_count {
            for backup in &backups[self.retention_count..] {
                tracing::info!(backup_id = %backup.id, "Evicting old backup");
                // Metadata first: a listed backup always has its snapshot
                namespace
                    .remove(&format!("{}{METADATA_SUFFIX}", backup.id))
                    .await?;
                namespace.remove(&backup.id).await?;
                evicted += 1;
            }
        }

        BACKUPS_RETAINED.set(backups.len().min(self.retention_count) as i64);
        Ok(evicted)
    }

    // =========================================================================
    // Restore
    // =========================================================================

    /// Replace data with the contents of a retained backup
    ///
    /// Takes no safety backup of its own. The backup record is kept.
    pub async fn restore_from_backup(
        &self,
        id: &str,
        context: &CycleContext,
    ) -> Result<ImportSummary, AppError> {
        let result = async {
            let snapshot = self.get_backup(id).await?;
            import_snapshot(&self.store, &snapshot, None, context).await
        }
        .await;

        record_restore("backup", &result);
        if let Ok(summary) = &result {
            tracing::info!(backup_id = %id, cycle = %summary.cycle, "Restored from backup");
        }
        result
    }

    /// Retained fallback copies, newest first
    pub async fn list_fallback(&self) -> Result<Vec<FallbackEntry>, AppError> {
        self.fallback.list().await
    }

    /// Replace data with the contents of a fallback copy
    pub async fn restore_from_fallback(
        &self,
        key: &str,
        context: &CycleContext,
    ) -> Result<ImportSummary, AppError> {
        let result = async {
            let snapshot = self.fallback.load(key).await?;
            import_snapshot(&self.store, &snapshot, None, context).await
        }
        .await;

        record_restore("fallback", &result);
        result
    }

    /// Import an uploaded export file
    ///
    /// Accepts wrapped and bare documents. A recorded checksum must match.
    /// A safety backup of the target cycle is taken before anything is
    /// overwritten.
    pub async fn import_document(
        &self,
        bytes: &[u8],
        cycle: Option<&str>,
        context: &CycleContext,
    ) -> Result<ImportSummary, AppError> {
        let document = parse_document(bytes)?;
        document.verify_checksum()?;

        let target_cycle = cycle
            .or(document.snapshot.cycle.as_deref())
            .filter(|cycle| !cycle.trim().is_empty())
            .unwrap_or(context.cycle());
        let safety = self
            .create_backup(&context.with_cycle(target_cycle), BackupTrigger::PreImport)
            .await?;
        tracing::info!(backup_id = %safety.id, "Pre-import safety backup taken");

        let result = import_snapshot(&self.store, &document.snapshot, cycle, context).await;
        record_restore("file", &result);
        result
    }

    /// Wrapped export of one cycle, for download
    pub async fn export_document(
        &self,
        context: &CycleContext,
    ) -> Result<(String, SnapshotDocument), AppError> {
        let snapshot = export_snapshot(&self.store, context).await?;
        self.exporter.document(snapshot)
    }

    // =========================================================================
    // Integrity and lifecycle
    // =========================================================================

    /// Minimal shape check of the cycle's snapshot
    ///
    /// True when the snapshot is an object whose `students` and `users`
    /// fields are arrays. Export failures count as a failed check.
    pub async fn check_data_integrity(&self, context: &CycleContext) -> bool {
        let snapshot = match export_snapshot(&self.store, context).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::error!(
                    %error,
                    cycle = %context.cycle(),
                    "Integrity check could not export"
                );
                return false;
            }
        };

        let valid = match serde_json::to_value(&snapshot) {
            Ok(Value::Object(map)) => {
                map.get("students").is_some_and(Value::is_array)
                    && map.get("users").is_some_and(Value::is_array)
            }
            _ => false,
        };

        if !valid {
            tracing::warn!(cycle = %context.cycle(), "Integrity check failed");
        }
        valid
    }

    /// React to a lifecycle signal; never fails
    ///
    /// `Hidden` takes an auto-backup. `Unload` also writes a fallback copy.
    pub async fn handle_lifecycle(
        &self,
        event: LifecycleEvent,
        context: &CycleContext,
    ) -> LifecycleReport {
        let trigger = match event {
            LifecycleEvent::Hidden => BackupTrigger::Hidden,
            LifecycleEvent::Unload => BackupTrigger::Unload,
        };

        let mut report = LifecycleReport {
            backup_id: self
                .create_auto_backup(context, trigger)
                .await
                .map(|metadata| metadata.id),
            fallback_key: None,
        };

        if event == LifecycleEvent::Unload {
            let saved = match export_snapshot(&self.store, context).await {
                Ok(snapshot) => self.fallback.save(&snapshot).await,
                Err(error) => Err(error),
            };
            match saved {
                Ok(key) => report.fallback_key = Some(key),
                Err(error) => tracing::error!(%error, "Fallback copy on unload failed"),
            }
        }

        report
    }
}

fn record_restore(source: &str, result: &Result<ImportSummary, AppError>) {
    let status = if result.is_ok() { "success" } else { "failure" };
    RESTORES_TOTAL.with_label_values(&[source, status]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StoreName;
    use crate::snapshot::tests::create_test_store;
    use serde_json::json;
    use tempfile::TempDir;

    async fn create_test_manager() -> (BackupManager, Arc<Store>, TempDir) {
        let (store, temp_dir) = create_test_store().await;
        let config = crate::config::test_config(temp_dir.path());
        (BackupManager::new(Arc::clone(&store), &config), store, temp_dir)
    }

    #[tokio::test]
    async fn retention_keeps_ten_most_recent() {
        let (manager, _store, _temp_dir) = create_test_manager().await;
        let context = CycleContext::new("X", None);

        let mut created = Vec::new();
        for _ in 0..13 {
            created.push(
                manager
                    .create_backup(&context, BackupTrigger::Interval)
                    .await
                    .unwrap(),
            );
        }

        let listed = manager.list_backups().await.unwrap();
        assert_eq!(listed.len(), 10);
        assert_eq!(listed[0], created[12]);
        for evicted in &created[..3] {
            assert!(listed.iter().all(|b| b.id != evicted.id));
            assert!(matches!(
                manager.get_backup(&evicted.id).await,
                Err(AppError::SnapshotNotFound(_))
            ));
        }
        assert!(listed.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
    }

    #[tokio::test]
    async fn eviction_leaves_no_listed_backup_without_snapshot() {
        let (manager, store, _temp_dir) = create_test_manager().await;
        let context = CycleContext::new("X", None);

        for _ in 0..12 {
            manager
                .create_backup(&context, BackupTrigger::Interval)
                .await
                .unwrap();
        }

        let keys = store.system(BACKUP_NAMESPACE).keys().await.unwrap();
        assert_eq!(keys.len(), 20);
        for backup in manager.list_backups().await.unwrap() {
            manager.get_backup(&backup.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn new_manager_never_reuses_a_stored_backup_id() {
        let (store, temp_dir) = create_test_store().await;
        let config = crate::config::test_config(temp_dir.path());
        let context = CycleContext::new("X", None);

        // Left behind by a process whose clock ran an hour ahead
        let ahead = chrono::Utc::now().timestamp_millis() + 3_600_000;
        let existing = BackupMetadata {
            id: format!("{BACKUP_PREFIX}{ahead}"),
            timestamp: ahead,
            cycle: "X".to_string(),
            size: 2,
            version: "1.0".to_string(),
        };
        let namespace = store.system(BACKUP_NAMESPACE);
        let kept = json!({"cycle": "X", "students": [{"id": "kept"}]});
        namespace.set(&existing.id, &kept).await.unwrap();
        namespace
            .set(
                &format!("{}{METADATA_SUFFIX}", existing.id),
                &serde_json::to_value(&existing).unwrap(),
            )
            .await
            .unwrap();

        let manager = BackupManager::new(Arc::clone(&store), &config);
        let created = manager
            .create_backup(&context, BackupTrigger::Manual)
            .await
            .unwrap();

        assert_ne!(created.id, existing.id);
        assert!(created.timestamp > ahead);
        let listed = manager.list_backups().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, created.id);
        let restored = manager.get_backup(&existing.id).await.unwrap();
        assert_eq!(restored.students, vec![json!({"id": "kept"})]);
    }

    #[tokio::test]
    async fn metadata_describes_backup() {
        let (manager, store, _temp_dir) = create_test_manager().await;
        let context = CycleContext::new("متوسط", None);
        store
            .partition(StoreName::Students, &context)
            .set("s1", &json!({"id": "s1"}))
            .await
            .unwrap();

        let metadata = manager
            .create_backup(&context, BackupTrigger::Manual)
            .await
            .unwrap();

        assert!(metadata.id.starts_with("backup_"));
        assert_eq!(metadata.id, format!("backup_{}", metadata.timestamp));
        assert_eq!(metadata.cycle, "متوسط");
        assert_eq!(metadata.version, "1.0");
        let data = serde_json::to_string(&manager.get_backup(&metadata.id).await.unwrap()).unwrap();
        assert_eq!(metadata.size, data.len());
    }

    #[tokio::test]
    async fn manual_backup_then_restore_recovers_student() {
        let (manager, store, _temp_dir) = create_test_manager().await;
        let context = CycleContext::new("متوسط", None);
        let student =
            json!({"id": "s1", "studentId": "001", "firstName": "Ali", "lastName": "Ben"});
        store
            .partition(StoreName::Students, &context)
            .set("s1", &student)
            .await
            .unwrap();

        let report = manager.manual_backup(&context).await.unwrap();
        assert!(report.export_path.exists());

        store.clear_all_cycle_data(&context).await.unwrap();
        let students = store.partition(StoreName::Students, &context);
        assert!(students.values().await.unwrap().is_empty());

        let latest = manager.list_backups().await.unwrap().remove(0);
        assert_eq!(latest.id, report.backup.id);
        manager.restore_from_backup(&latest.id, &context).await.unwrap();

        assert_eq!(students.get("s1").await.unwrap(), Some(student));
        assert!(manager.get_backup(&latest.id).await.is_ok());
    }

    #[tokio::test]
    async fn restoring_unknown_backup_fails() {
        let (manager, _store, _temp_dir) = create_test_manager().await;
        let context = CycleContext::new("X", None);

        let result = manager.restore_from_backup("backup_42", &context).await;
        assert!(matches!(result, Err(AppError::SnapshotNotFound(id)) if id == "backup_42"));
    }

    #[tokio::test]
    async fn integrity_check_passes_for_exported_data() {
        let (manager, _store, _temp_dir) = create_test_manager().await;
        assert!(
            manager
                .check_data_integrity(&CycleContext::new("X", None))
                .await
        );
    }

    #[tokio::test]
    async fn import_document_takes_safety_backup() {
        let (manager, store, _temp_dir) = create_test_manager().await;
        let context = CycleContext::new("X", None);
        store
            .partition(StoreName::Students, &context)
            .set("old", &json!({"id": "old"}))
            .await
            .unwrap();

        let incoming = Snapshot {
            cycle: Some("X".to_string()),
            students: vec![json!({"id": "new"})],
            ..Snapshot::default()
        };
        let document = SnapshotDocument::wrap(incoming, "1.0", "test").unwrap();
        let bytes = serde_json::to_vec(&document).unwrap();

        manager.import_document(&bytes, Some("X"), &context).await.unwrap();

        let students = store.partition(StoreName::Students, &context);
        assert_eq!(students.keys().await.unwrap(), vec!["new"]);

        let safety = manager.list_backups().await.unwrap().remove(0);
        let saved = manager.get_backup(&safety.id).await.unwrap();
        assert_eq!(saved.students, vec![json!({"id": "old"})]);
    }

    #[tokio::test]
    async fn tampered_document_is_rejected_before_any_write() {
        let (manager, store, _temp_dir) = create_test_manager().await;
        let context = CycleContext::new("X", None);

        let document = SnapshotDocument::wrap(Snapshot::default(), "1.0", "test").unwrap();
        let mut value = serde_json::to_value(&document).unwrap();
        value["students"] = json!([{"id": "injected"}]);

        let result = manager
            .import_document(value.to_string().as_bytes(), None, &context)
            .await;

        assert!(matches!(result, Err(AppError::ChecksumMismatch)));
        assert!(manager.list_backups().await.unwrap().is_empty());
        assert_eq!(
            store.partition(StoreName::Students, &context).count().await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn unload_writes_backup_and_fallback_copy() {
        let (manager, _store, _temp_dir) = create_test_manager().await;
        let context = CycleContext::new("X", None);

        let report = manager
            .handle_lifecycle(LifecycleEvent::Unload, &context)
            .await;

        assert!(report.backup_id.is_some());
        let key = report.fallback_key.unwrap();
        assert_eq!(manager.list_fallback().await.unwrap()[0].key, key);

        let hidden = manager
            .handle_lifecycle(LifecycleEvent::Hidden, &context)
            .await;
        assert!(hidden.fallback_key.is_none());
        assert_eq!(manager.list_backups().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fallback_restore_recovers_data() {
        let (manager, store, _temp_dir) = create_test_manager().await;
        let context = CycleContext::new("X", None);
        store
            .partition(StoreName::Goals, &context)
            .set("g1", &json!({"id": "g1"}))
            .await
            .unwrap();

        let report = manager.handle_lifecycle(LifecycleEvent::Unload, &context).await;
        store.clear_all_cycle_data(&context).await.unwrap();

        manager
            .restore_from_fallback(&report.fallback_key.unwrap(), &context)
            .await
            .unwrap();
        assert_eq!(
            store.partition(StoreName::Goals, &context).count().await.unwrap(),
            1
        );
    }
}
