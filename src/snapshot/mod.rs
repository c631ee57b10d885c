//! Snapshot export and import
//!
//! A snapshot is every partition of one cycle collected into a single
//! document, plus the shared users partition. Import is destructive per
//! partition and deliberately not atomic across partitions: a failure
//! partway leaves earlier partitions replaced and later ones untouched.

mod document;

pub use document::{
    ExportMetadata, SnapshotDocument, TotalRecords, checksum, export_filename, parse_document,
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::data::records::record_id;
use crate::data::{
    ChangeReason, CycleContext, DataChanged, EntityId, PartitionHandle, SETTINGS_KEY, Store,
    StoreName,
};
use crate::error::AppError;
use crate::metrics::IMPORTS_TOTAL;

/// Aggregate of every partition of one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub cycle: Option<String>,
    /// Export time in milliseconds since the epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub students: Vec<Value>,
    #[serde(default)]
    pub users: Vec<Value>,
    /// The singleton `"settings"` record
    #[serde(default)]
    pub settings: Option<Value>,
    /// Any other keys of the settings partition
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings_entries: BTreeMap<String, Value>,
    #[serde(default)]
    pub tests: Vec<Value>,
    #[serde(default)]
    pub test_results: Vec<Value>,
    #[serde(default)]
    pub grades: Vec<Value>,
    #[serde(default)]
    pub reports: Vec<Value>,
    #[serde(default)]
    pub goals: Vec<Value>,
    #[serde(default)]
    pub news: Vec<Value>,
    #[serde(default)]
    pub intervention: Vec<Value>,
    #[serde(default)]
    pub counselor: Vec<Value>,
    #[serde(default)]
    pub schedule: Vec<Value>,
    #[serde(default)]
    pub analysis: Vec<Value>,
    #[serde(default)]
    pub recommendations: Vec<Value>,
}

impl Snapshot {
    /// Record array of a list-shaped partition; `None` for settings
    pub fn records(&self, name: StoreName) -> Option<&Vec<Value>> {
        Some(match name {
            StoreName::Students => &self.students,
            StoreName::Users => &self.users,
            StoreName::Tests => &self.tests,
            StoreName::TestResults => &self.test_results,
            StoreName::Grades => &self.grades,
            StoreName::Reports => &self.reports,
            StoreName::Goals => &self.goals,
            StoreName::News => &self.news,
            StoreName::Intervention => &self.intervention,
            StoreName::Counselor => &self.counselor,
            StoreName::Schedule => &self.schedule,
            StoreName::Analysis => &self.analysis,
            StoreName::Recommendations => &self.recommendations,
            StoreName::Settings => return None,
        })
    }

    fn records_mut(&mut self, name: StoreName) -> Option<&mut Vec<Value>> {
        Some(match name {
            StoreName::Students => &mut self.students,
            StoreName::Users => &mut self.users,
            StoreName::Tests => &mut self.tests,
            StoreName::TestResults => &mut self.test_results,
            StoreName::Grades => &mut self.grades,
            StoreName::Reports => &mut self.reports,
            StoreName::Goals => &mut self.goals,
            StoreName::News => &mut self.news,
            StoreName::Intervention => &mut self.intervention,
            StoreName::Counselor => &mut self.counselor,
            StoreName::Schedule => &mut self.schedule,
            StoreName::Analysis => &mut self.analysis,
            StoreName::Recommendations => &mut self.recommendations,
            StoreName::Settings => return None,
        })
    }

    /// Record count per partition name
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = StoreName::CYCLE_SCOPED
            .iter()
            .chain(std::iter::once(&StoreName::Users))
            .filter_map(|name| {
                self.records(*name)
                    .map(|records| (name.as_str().to_string(), records.len()))
            })
            .collect();
        counts.insert(
            StoreName::Settings.as_str().to_string(),
            usize::from(self.settings.is_some()) + self.settings_entries.len(),
        );
        counts
    }

    /// Entries to write into one partition, keyed by record id
    fn entries_for(&self, name: StoreName) -> Vec<(String, Value)> {
        if name == StoreName::Settings {
            let mut entries: Vec<(String, Value)> = self
                .settings_entries
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            if let Some(settings) = &self.settings {
                entries.push((SETTINGS_KEY.to_string(), settings.clone()));
            }
            return entries;
        }

        self.records(name)
            .map(|records| records.iter().cloned().map(keyed_record).collect())
            .unwrap_or_default()
    }
}

/// Key a record by its own id, generating and injecting one when absent
fn keyed_record(mut record: Value) -> (String, Value) {
    if let Some(id) = record_id(&record) {
        return (id, record);
    }

    let id = EntityId::new().0;
    if let Value::Object(map) = &mut record {
        map.insert("id".to_string(), Value::String(id.clone()));
    }
    (id, record)
}

// =============================================================================
// Export
// =============================================================================

/// Collect every partition of the context's cycle plus the shared users
///
/// Read-only.
pub async fn export_snapshot(
    store: &Arc<Store>,
    context: &CycleContext,
) -> Result<Snapshot, AppError> {
    let mut snapshot = Snapshot {
        cycle: Some(context.cycle().to_string()),
        timestamp: Some(Utc::now().timestamp_millis()),
        ..Snapshot::default()
    };

    for name in StoreName::CYCLE_SCOPED {
        let entries = store.partition(name, context).entries().await?;
        if name == StoreName::Settings {
            for (key, value) in entries {
                if key == SETTINGS_KEY {
                    snapshot.settings = Some(value);
                } else {
                    snapshot.settings_entries.insert(key, value);
                }
            }
        } else if let Some(records) = snapshot.records_mut(name) {
            records.extend(entries.into_iter().map(|(_, value)| value));
        }
    }

    snapshot.users = store.users().values().await?;

    tracing::debug!(
        cycle = %context.cycle(),
        students = snapshot.students.len(),
        users = snapshot.users.len(),
        "Snapshot exported"
    );
    Ok(snapshot)
}

// =============================================================================
// Import
// =============================================================================

/// Outcome of a completed import
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub cycle: String,
    pub full: bool,
    pub counts: BTreeMap<String, usize>,
}

/// Replace the target cycle's partitions with the snapshot's contents
///
/// The target cycle is `cycle` if given, else `snapshot.cycle`, else the
/// context's cycle. With an explicit cycle the import is cycle-scoped and
/// the shared users partition is left untouched; without one it is a full
/// import and users are replaced as well.
pub async fn import_snapshot(
    store: &Arc<Store>,
    snapshot: &Snapshot,
    cycle: Option<&str>,
    context: &CycleContext,
) -> Result<ImportSummary, AppError> {
    let full = cycle.is_none();
    let scope = if full { "full" } else { "cycle" };
    let target_cycle = cycle
        .or(snapshot.cycle.as_deref())
        .map(str::trim)
        .filter(|cycle| !cycle.is_empty())
        .unwrap_or(context.cycle())
        .to_string();
    let target = context.with_cycle(&target_cycle);

    tracing::info!(cycle = %target_cycle, full, "Importing snapshot");

    match write_partitions(store, snapshot, &target, full).await {
        Ok(counts) => {
            IMPORTS_TOTAL.with_label_values(&[scope, "success"]).inc();

            let mut event = DataChanged::new(ChangeReason::Import, Some(&target_cycle), None);
            event.counts = counts.clone();
            store.events().emit(event);

            tracing::info!(cycle = %target_cycle, ?counts, "Snapshot imported");
            Ok(ImportSummary {
                cycle: target_cycle,
                full,
                counts,
            })
        }
        Err(error) => {
            IMPORTS_TOTAL.with_label_values(&[scope, "failure"]).inc();
            tracing::error!(cycle = %target_cycle, %error, "Snapshot import failed partway");
            Err(error)
        }
    }
}

async fn write_partitions(
    store: &Arc<Store>,
    snapshot: &Snapshot,
    target: &CycleContext,
    full: bool,
) -> Result<BTreeMap<String, usize>, AppError> {
    let mut counts = BTreeMap::new();
    let mut mirrored = Vec::new();

    for name in StoreName::CYCLE_SCOPED {
        let handle = store.partition(name, target);
        let entries = snapshot.entries_for(name);
        let copy = name.is_mirrored().then(|| entries.clone());
        let (written, generation) = replace_partition(&handle, entries).await?;
        if let (Some(entries), Some(generation)) = (copy, generation) {
            mirrored.push(MirroredWrite {
                handle,
                generation,
                entries,
            });
        }
        counts.insert(name.as_str().to_string(), written);
    }

    if full {
        let users = snapshot.entries_for(StoreName::Users);
        let (written, _) = replace_partition(&store.users(), users).await?;
        counts.insert(StoreName::Users.as_str().to_string(), written);
    }

    mirror_collections(store, mirrored).await;
    Ok(counts)
}

async fn replace_partition(
    handle: &PartitionHandle,
    entries: Vec<(String, Value)>,
) -> Result<(usize, Option<u64>), AppError> {
    let partition = handle.name().map(StoreName::as_str).unwrap_or("unknown");
    let failure = |error: AppError| AppError::ImportPartialFailure {
        partition: partition.to_string(),
        reason: error.to_string(),
    };

    handle.clear_quietly().await.map_err(failure)?;
    handle.write_tracked(entries).await.map_err(failure)
}

/// Entries written to a mirrored partition, with the cache generation the
/// write left behind
struct MirroredWrite {
    handle: PartitionHandle,
    generation: u64,
    entries: Vec<(String, Value)>,
}

/// Prime the collection cache with the freshly imported collections
///
/// Values are keyed the way they were written, so the cache matches a
/// fresh read of the partition. A collection written to again since the
/// import is left uncached.
async fn mirror_collections(store: &Arc<Store>, written: Vec<MirroredWrite>) {
    for write in written {
        let by_key: BTreeMap<String, Value> = write.entries.into_iter().collect();
        store
            .cache()
            .put_if_unchanged(
                write.handle.namespace(),
                write.generation,
                by_key.into_values().collect(),
            )
            .await;
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Record counts and serialized size of one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
    pub cycle: String,
    pub counts: BTreeMap<String, i64>,
    pub total_records: i64,
    /// Byte length of the cycle's serialized snapshot
    pub snapshot_bytes: usize,
}

pub async fn database_stats(
    store: &Arc<Store>,
    context: &CycleContext,
) -> Result<DatabaseStats, AppError> {
    let counts = store.partition_counts(context).await?;
    let snapshot = export_snapshot(store, context).await?;

    Ok(DatabaseStats {
        cycle: context.cycle().to_string(),
        total_records: counts.values().sum(),
        counts,
        snapshot_bytes: serde_json::to_vec(&snapshot)?.len(),
    })
}
