//! Fast-path collection cache
//!
//! Volatile mirror of the human-facing collections (reports, goals,
//! news, ...) keyed by partition namespace, so repeated UI reads skip
//! SQLite. Uses Moka for concurrent caching.
//!
//! Every invalidation bumps a per-namespace generation. A reader loads
//! under the generation it saw first and only fills the cache if no
//! invalidation happened meanwhile.

use moka::future::Cache;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Cached collection contents, keyed by partition namespace
pub struct CollectionCache {
    collections: Cache<String, Arc<Vec<Value>>>,
    generations: Mutex<HashMap<String, u64>>,
}

impl CollectionCache {
    /// Create new collection cache
    ///
    /// # Arguments
    /// * `max_entries` - Maximum number of collections to keep
    /// * `ttl` - Time to live per collection
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let collections = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self {
            collections,
            generations: Mutex::new(HashMap::new()),
        }
    }

    /// Current invalidation generation of one collection
    pub async fn generation(&self, namespace: &str) -> u64 {
        self.generations
            .lock()
            .await
            .get(namespace)
            .copied()
            .unwrap_or(0)
    }

    /// Fill one collection if it was not invalidated since `generation`
    ///
    /// Returns whether the values were cached.
    pub async fn put_if_unchanged(
        &self,
        namespace: &str,
        generation: u64,
        values: Vec<Value>,
    ) -> bool {
        let generations = self.generations.lock().await;
        if generations.get(namespace).copied().unwrap_or(0) != generation {
            tracing::debug!(namespace, "Skipped caching a collection invalidated during load");
            return false;
        }

        self.collections
            .insert(namespace.to_string(), Arc::new(values))
            .await;
        true
    }

    /// Get one collection
    pub async fn get(&self, namespace: &str) -> Option<Arc<Vec<Value>>> {
        let result = self.collections.get(namespace).await;

        // Record cache hit/miss
        use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};
        if result.is_some() {
            CACHE_HITS_TOTAL.inc();
        } else {
            CACHE_MISSES_TOTAL.inc();
        }

        result
    }

    /// Drop one collection and return its new generation
    pub async fn invalidate(&self, namespace: &str) -> u64 {
        let mut generations = self.generations.lock().await;
        let generation = generations.entry(namespace.to_string()).or_insert(0);
        *generation += 1;
        self.collections.invalidate(namespace).await;
        *generation
    }
}
