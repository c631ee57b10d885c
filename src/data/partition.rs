//! Partition registry
//!
//! A partition is a named key → JSON map inside one cycle. Its physical
//! namespace is a pure function of (store name, cycle, user id), so two
//! cycles never share rows and switching cycles only changes which
//! namespace subsequent calls target. The `users` partition is the one
//! exception: it is shared by every cycle.

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::ControlFlow;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::cache::CollectionCache;
use super::database::Database;
use super::events::{ChangeReason, DataChanged, EventBus};
use crate::error::AppError;
use crate::metrics::{STORAGE_ERRORS_TOTAL, STORAGE_OPERATIONS_TOTAL};

/// Prefix shared by every namespace
pub const DATABASE_NAME: &str = "schoolManagement";

// =============================================================================
// Store names
// =============================================================================

/// Enumerated partition names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreName {
    Students,
    Settings,
    Tests,
    TestResults,
    Grades,
    Reports,
    Goals,
    News,
    Intervention,
    Counselor,
    Schedule,
    Analysis,
    Recommendations,
    Users,
}

impl StoreName {
    /// Every partition scoped to a cycle, in export order
    pub const CYCLE_SCOPED: [StoreName; 13] = [
        StoreName::Students,
        StoreName::Settings,
        StoreName::Tests,
        StoreName::TestResults,
        StoreName::Grades,
        StoreName::Reports,
        StoreName::Goals,
        StoreName::News,
        StoreName::Intervention,
        StoreName::Counselor,
        StoreName::Schedule,
        StoreName::Analysis,
        StoreName::Recommendations,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StoreName::Students => "students",
            StoreName::Settings => "settings",
            StoreName::Tests => "tests",
            StoreName::TestResults => "testResults",
            StoreName::Grades => "grades",
            StoreName::Reports => "reports",
            StoreName::Goals => "goals",
            StoreName::News => "news",
            StoreName::Intervention => "intervention",
            StoreName::Counselor => "counselor",
            StoreName::Schedule => "schedule",
            StoreName::Analysis => "analysis",
            StoreName::Recommendations => "recommendations",
            StoreName::Users => "users",
        }
    }

    /// Shared across cycles
    pub fn is_shared(self) -> bool {
        matches!(self, StoreName::Users)
    }

    /// Mirrored into the fast-path collection cache
    pub fn is_mirrored(self) -> bool {
        matches!(
            self,
            StoreName::Reports
                | StoreName::Goals
                | StoreName::News
                | StoreName::Intervention
                | StoreName::Counselor
                | StoreName::Schedule
                | StoreName::Analysis
                | StoreName::Recommendations
        )
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StoreName::CYCLE_SCOPED
            .iter()
            .chain(std::iter::once(&StoreName::Users))
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("unknown partition: {s}")))
    }
}

// =============================================================================
// Cycle context
// =============================================================================

/// The (cycle, user) pair every cycle-scoped call is made against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CycleContext {
    cycle: String,
    user_id: Option<String>,
}

impl CycleContext {
    pub fn new(cycle: &str, user_id: Option<&str>) -> Self {
        Self {
            cycle: cycle.trim().to_string(),
            user_id: user_id
                .map(str::trim)
                .filter(|user| !user.is_empty())
                .map(str::to_string),
        }
    }

    /// Build a context, rejecting a blank cycle name
    pub fn parse(cycle: &str, user_id: Option<&str>) -> Result<Self, AppError> {
        let context = Self::new(cycle, user_id);
        if context.cycle.is_empty() {
            return Err(AppError::Validation("cycle must not be empty".to_string()));
        }
        Ok(context)
    }

    pub fn cycle(&self) -> &str {
        &self.cycle
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Same user scope, different cycle
    pub fn with_cycle(&self, cycle: &str) -> Self {
        Self::new(cycle, self.user_id.as_deref())
    }
}

fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

/// Physical namespace of a partition
///
/// Segments are percent-encoded, so distinct (store, cycle, user) triples
/// always yield distinct namespaces.
pub fn partition_namespace(store: StoreName, cycle: &str, user_id: Option<&str>) -> String {
    if store.is_shared() {
        return format!("{DATABASE_NAME}/{}", store.as_str());
    }

    let mut namespace = format!("{DATABASE_NAME}/{}/{}", store.as_str(), encode_segment(cycle));
    if let Some(user) = user_id.filter(|user| !user.is_empty()) {
        namespace.push('/');
        namespace.push_str(&encode_segment(user));
    }
    namespace
}

/// Namespace for internal bookkeeping (backups, metadata, sync hub)
pub fn system_namespace(name: &str) -> String {
    format!("{DATABASE_NAME}/_{name}")
}

// =============================================================================
// Store
// =============================================================================

/// Shared storage root: database, change events, cache and dirty tracking
pub struct Store {
    db: Database,
    events: EventBus,
    cache: CollectionCache,
    generation: AtomicU64,
}

impl Store {
    pub fn new(db: Database, cache: CollectionCache) -> Arc<Self> {
        Arc::new(Self {
            db,
            events: EventBus::new(),
            cache,
            generation: AtomicU64::new(0),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cache(&self) -> &CollectionCache {
        &self.cache
    }

    /// Handle to one partition
    ///
    /// Repeated calls with identical arguments address the same namespace.
    /// Asking for `Users` returns the shared partition whatever the context.
    pub fn partition(self: &Arc<Self>, name: StoreName, context: &CycleContext) -> PartitionHandle {
        let cycle = (!name.is_shared()).then(|| context.cycle().to_string());
        PartitionHandle {
            store: Arc::clone(self),
            namespace: partition_namespace(name, context.cycle(), context.user_id()),
            scope: HandleScope::Partition { name, cycle },
        }
    }

    /// Handle to the shared users partition
    pub fn users(self: &Arc<Self>) -> PartitionHandle {
        PartitionHandle {
            store: Arc::clone(self),
            namespace: partition_namespace(StoreName::Users, "", None),
            scope: HandleScope::Partition {
                name: StoreName::Users,
                cycle: None,
            },
        }
    }

    /// Handle to an internal namespace; writes do not mark data dirty
    pub fn system(self: &Arc<Self>, name: &str) -> PartitionHandle {
        PartitionHandle {
            store: Arc::clone(self),
            namespace: system_namespace(name),
            scope: HandleScope::System,
        }
    }

    /// Monotonic counter bumped by every partition mutation
    pub fn write_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_dirty(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Remove every record of every cycle-scoped partition of one cycle
    ///
    /// The shared users partition and backup records are left alone.
    pub async fn clear_all_cycle_data(
        self: &Arc<Self>,
        context: &CycleContext,
    ) -> Result<(), AppError> {
        let mut event = DataChanged::new(ChangeReason::Clear, Some(context.cycle()), None);
        for name in StoreName::CYCLE_SCOPED {
            let removed = self.partition(name, context).clear_quietly().await?;
            event = event.with_count(name, removed as usize);
        }

        tracing::info!(
            cycle = %context.cycle(),
            user_id = ?context.user_id(),
            "Cycle data cleared"
        );
        self.events.emit(event);
        Ok(())
    }

    /// Record counts per partition for one cycle, plus the shared users
    pub async fn partition_counts(
        self: &Arc<Self>,
        context: &CycleContext,
    ) -> Result<BTreeMap<String, i64>, AppError> {
        let mut counts = BTreeMap::new();
        for name in StoreName::CYCLE_SCOPED {
            counts.insert(
                name.as_str().to_string(),
                self.partition(name, context).count().await?,
            );
        }
        counts.insert("users".to_string(), self.users().count().await?);
        Ok(counts)
    }
}

#[derive(Debug, Clone)]
enum HandleScope {
    Partition {
        name: StoreName,
        cycle: Option<String>,
    },
    System,
}

// =============================================================================
// Partition handle
// =============================================================================

/// Handle to one namespace of the record table
///
/// Every write is persisted immediately. Failures are logged here and
/// returned as `StorageUnavailable`; nothing is retried.
#[derive(Clone)]
pub struct PartitionHandle {
    store: Arc<Store>,
    namespace: String,
    scope: HandleScope,
}

impl fmt::Debug for PartitionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionHandle")
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl PartitionHandle {
    /// Physical namespace backing this handle
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> Option<StoreName> {
        match &self.scope {
            HandleScope::Partition { name, .. } => Some(*name),
            HandleScope::System => None,
        }
    }

    /// Cycle this handle writes to; `None` for shared and system handles
    pub fn cycle_name(&self) -> Option<&str> {
        match &self.scope {
            HandleScope::Partition { cycle, .. } => cycle.as_deref(),
            HandleScope::System => None,
        }
    }

    fn storage_failure(&self, operation: &'static str, error: AppError) -> AppError {
        STORAGE_ERRORS_TOTAL.with_label_values(&[operation]).inc();
        tracing::error!(
            namespace = %self.namespace,
            operation,
            %error,
            "Partition operation failed"
        );
        match error {
            AppError::Database(inner) => AppError::StorageUnavailable(inner.to_string()),
            other => other,
        }
    }

    fn record_operation(&self, operation: &'static str) {
        STORAGE_OPERATIONS_TOTAL.with_label_values(&[operation]).inc();
    }

    async fn after_write(&self, reason: ChangeReason, count: usize) {
        let HandleScope::Partition { name, cycle } = &self.scope else {
            return;
        };

        self.store.mark_dirty();
        if name.is_mirrored() {
            self.store.cache.invalidate(&self.namespace).await;
        }
        self.store.events.emit(
            DataChanged::new(reason, cycle.as_deref(), Some(*name)).with_count(*name, count),
        );
    }

    /// Read one record
    pub async fn get(&self, key: &str) -> Result<Option<Value>, AppError> {
        self.record_operation("get");
        let raw = self
            .store
            .db
            .get(&self.namespace, key)
            .await
            .map_err(|e| self.storage_failure("get", e))?;

        raw.map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| self.storage_failure("get", e.into()))
    }

    /// Write one record
    pub async fn set(&self, key: &str, value: &Value) -> Result<(), AppError> {
        self.record_operation("set");
        let raw = serde_json::to_string(value)?;
        self.store
            .db
            .put(&self.namespace, key, &raw)
            .await
            .map_err(|e| self.storage_failure("set", e))?;

        self.after_write(ChangeReason::AddOrUpdate, 1).await;
        Ok(())
    }

    /// Write several records in one transaction
    pub async fn set_many(&self, entries: Vec<(String, Value)>) -> Result<usize, AppError> {
        let count = self.write_quietly(entries).await?;
        self.after_write(ChangeReason::BulkUpsert, count).await;
        Ok(count)
    }

    /// Delete one record
    pub async fn remove(&self, key: &str) -> Result<(), AppError> {
        self.record_operation("remove");
        self.store
            .db
            .delete(&self.namespace, key)
            .await
            .map_err(|e| self.storage_failure("remove", e))?;

        self.after_write(ChangeReason::Delete, 1).await;
        Ok(())
    }

    /// Delete every record of this partition only
    pub async fn clear(&self) -> Result<u64, AppError> {
        let removed = self.clear_quietly().await?;
        self.after_write(ChangeReason::Clear, removed as usize).await;
        Ok(removed)
    }

    /// Visit every entry in key order
    ///
    /// Returning `ControlFlow::Break` from the visitor stops the scan.
    pub async fn iterate<F>(&self, mut visitor: F) -> Result<(), AppError>
    where
        F: FnMut(&str, &Value) -> ControlFlow<()>,
    {
        self.record_operation("iterate");
        let mut rows = self.store.db.stream(&self.namespace);
        while let Some((key, raw)) = rows
            .try_next()
            .await
            .map_err(|e| self.storage_failure("iterate", e.into()))?
        {
            let value: Value = serde_json::from_str(&raw)
                .map_err(|e| self.storage_failure("iterate", e.into()))?;
            if visitor(&key, &value).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// All entries as `(key, value)` pairs
    pub async fn entries(&self) -> Result<Vec<(String, Value)>, AppError> {
        let mut entries = Vec::new();
        self.iterate(|key, value| {
            entries.push((key.to_string(), value.clone()));
            ControlFlow::Continue(())
        })
        .await?;
        Ok(entries)
    }

    /// All values, served from the collection cache for mirrored partitions
    ///
    /// A load that races a write is returned but not cached.
    pub async fn values(&self) -> Result<Vec<Value>, AppError> {
        let generation = if self.is_mirrored() {
            if let Some(cached) = self.store.cache.get(&self.namespace).await {
                return Ok(cached.as_ref().clone());
            }
            Some(self.store.cache.generation(&self.namespace).await)
        } else {
            None
        };

        let values: Vec<Value> = self.entries().await?.into_iter().map(|(_, v)| v).collect();
        if let Some(generation) = generation {
            self.store
                .cache
                .put_if_unchanged(&self.namespace, generation, values.clone())
                .await;
        }
        Ok(values)
    }

    /// Keys in key order
    pub async fn keys(&self) -> Result<Vec<String>, AppError> {
        self.store
            .db
            .keys(&self.namespace)
            .await
            .map_err(|e| self.storage_failure("keys", e))
    }

    pub async fn count(&self) -> Result<i64, AppError> {
        self.store
            .db
            .count(&self.namespace)
            .await
            .map_err(|e| self.storage_failure("count", e))
    }

    /// Bulk write without emitting a change event
    pub(crate) async fn write_quietly(
        &self,
        entries: Vec<(String, Value)>,
    ) -> Result<usize, AppError> {
        Ok(self.write_tracked(entries).await?.0)
    }

    /// `write_quietly`, also returning the cache generation the write left
    /// behind for mirrored partitions
    pub(crate) async fn write_tracked(
        &self,
        entries: Vec<(String, Value)>,
    ) -> Result<(usize, Option<u64>), AppError> {
        self.record_operation("set_many");
        let raw = entries
            .into_iter()
            .map(|(key, value)| serde_json::to_string(&value).map(|raw| (key, raw)))
            .collect::<Result<Vec<_>, _>>()?;

        self.store
            .db
            .put_many(&self.namespace, &raw)
            .await
            .map_err(|e| self.storage_failure("set_many", e))?;

        let generation = self.note_quiet_write().await;
        Ok((raw.len(), generation))
    }

    /// Clear without emitting a change event
    pub(crate) async fn clear_quietly(&self) -> Result<u64, AppError> {
        self.record_operation("clear");
        let removed = self
            .store
            .db
            .clear(&self.namespace)
            .await
            .map_err(|e| self.storage_failure("clear", e))?;

        self.note_quiet_write().await;
        Ok(removed)
    }

    async fn note_quiet_write(&self) -> Option<u64> {
        if !matches!(self.scope, HandleScope::Partition { .. }) {
            return None;
        }
        self.store.mark_dirty();
        if self.is_mirrored() {
            Some(self.store.cache.invalidate(&self.namespace).await)
        } else {
            None
        }
    }

    fn is_mirrored(&self) -> bool {
        self.name().is_some_and(StoreName::is_mirrored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn create_test_store() -> (Arc<Store>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::connect(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let cache = CollectionCache::new(64, Duration::from_secs(60));
        (Store::new(db, cache), temp_dir)
    }

    #[test]
    fn namespace_is_pure_and_injective() {
        let a = partition_namespace(StoreName::Students, "متوسط", None);
        assert_eq!(a, partition_namespace(StoreName::Students, "متوسط", None));
        assert_ne!(a, partition_namespace(StoreName::Students, "ثانوي", None));
        assert_ne!(
            partition_namespace(StoreName::Students, "a/b", None),
            partition_namespace(StoreName::Students, "a", Some("b"))
        );
        assert_eq!(
            partition_namespace(StoreName::Users, "متوسط", Some("u1")),
            partition_namespace(StoreName::Users, "ثانوي", None)
        );
    }

    #[test]
    fn store_name_parses_camel_case() {
        assert_eq!(
            "testResults".parse::<StoreName>().unwrap(),
            StoreName::TestResults
        );
        assert!("teachers".parse::<StoreName>().is_err());
    }

    #[tokio::test]
    async fn handles_with_same_arguments_share_data() {
        let (store, _temp_dir) = create_test_store().await;
        let context = CycleContext::new("X", None);

        let first = store.partition(StoreName::Students, &context);
        let second = store.partition(StoreName::Students, &context);
        first.set("s1", &json!({"id": "s1"})).await.unwrap();

        assert_eq!(first.namespace(), second.namespace());
        assert_eq!(second.get("s1").await.unwrap(), Some(json!({"id": "s1"})));
    }

    #[tokio::test]
    async fn cycles_are_isolated() {
        let (store, _temp_dir) = create_test_store().await;
        let x = CycleContext::new("X", None);
        let y = x.with_cycle("Y");

        store
            .partition(StoreName::Students, &x)
            .set("s1", &json!({"id": "s1", "firstName": "Ali"}))
            .await
            .unwrap();

        assert!(store.partition(StoreName::Students, &y).values().await.unwrap().is_empty());
        assert_eq!(store.partition(StoreName::Students, &x).values().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn user_scope_isolated_within_cycle() {
        let (store, _temp_dir) = create_test_store().await;
        let alice = CycleContext::new("X", Some("alice"));
        let bob = CycleContext::new("X", Some("bob"));

        store
            .partition(StoreName::Grades, &alice)
            .set("g1", &json!({"id": "g1"}))
            .await
            .unwrap();

        assert_eq!(store.partition(StoreName::Grades, &bob).count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn iterate_stops_on_break() {
        let (store, _temp_dir) = create_test_store().await;
        let handle = store.partition(StoreName::Tests, &CycleContext::new("X", None));
        for id in ["a", "b", "c"] {
            handle.set(id, &json!({"id": id})).await.unwrap();
        }

        let mut seen = Vec::new();
        handle
            .iterate(|key, _| {
                seen.push(key.to_string());
                if key == "b" {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await
            .unwrap();

        assert_eq!(seen, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn writes_bump_generation_and_emit_events() {
        let (store, _temp_dir) = create_test_store().await;
        let mut subscription = store.events().subscribe();
        let before = store.write_generation();

        let handle = store.partition(StoreName::Reports, &CycleContext::new("X", None));
        handle.set("r1", &json!({"id": "r1"})).await.unwrap();

        assert!(store.write_generation() > before);
        let event = subscription.recv().await.unwrap();
        assert_eq!(event.reason, ChangeReason::AddOrUpdate);
        assert_eq!(event.partition, Some(StoreName::Reports));
        assert_eq!(event.cycle.as_deref(), Some("X"));
    }

    #[tokio::test]
    async fn system_writes_do_not_mark_dirty() {
        let (store, _temp_dir) = create_test_store().await;
        let before = store.write_generation();

        store.system("backups").set("backup_1", &json!({})).await.unwrap();
        assert_eq!(store.write_generation(), before);
    }

    #[tokio::test]
    async fn mirrored_values_refresh_after_write() {
        let (store, _temp_dir) = create_test_store().await;
        let handle = store.partition(StoreName::Goals, &CycleContext::new("X", None));

        handle.set("g1", &json!({"id": "g1"})).await.unwrap();
        assert_eq!(handle.values().await.unwrap().len(), 1);

        handle.set("g2", &json!({"id": "g2"})).await.unwrap();
        assert_eq!(handle.values().await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cold_read_racing_a_write_never_caches_stale_values() {
        let (store, _temp_dir) = create_test_store().await;
        let reports = store.partition(StoreName::Reports, &CycleContext::new("X", None));

        for round in 0..100 {
            let first = format!("a{round}");
            reports.set(&first, &json!({ "id": first })).await.unwrap();

            let reader = {
                let reports = reports.clone();
                tokio::spawn(async move { reports.values().await.unwrap() })
            };
            let writer = {
                let reports = reports.clone();
                let second = format!("b{round}");
                tokio::spawn(async move { reports.set(&second, &json!({ "id": second })).await })
            };
            reader.await.unwrap();
            writer.await.unwrap().unwrap();

            let listed = reports.values().await.unwrap().len() as i64;
            assert_eq!(listed, reports.count().await.unwrap(), "round {round}");
        }
    }

    #[tokio::test]
    async fn clear_all_cycle_data_keeps_users_and_other_cycles() {
        let (store, _temp_dir) = create_test_store().await;
        let x = CycleContext::new("X", None);
        let y = x.with_cycle("Y");

        store.partition(StoreName::Students, &x).set("s1", &json!({"id": "s1"})).await.unwrap();
        store.partition(StoreName::News, &x).set("n1", &json!({"id": "n1"})).await.unwrap();
        store.partition(StoreName::Students, &y).set("s2", &json!({"id": "s2"})).await.unwrap();
        store.users().set("u1", &json!({"id": "u1"})).await.unwrap();

        store.clear_all_cycle_data(&x).await.unwrap();

        let counts = store.partition_counts(&x).await.unwrap();
        assert!(counts.iter().filter(|(k, _)| *k != "users").all(|(_, c)| *c == 0));
        assert_eq!(counts["users"], 1);
        assert_eq!(store.partition(StoreName::Students, &y).count().await.unwrap(), 1);
    }
}
