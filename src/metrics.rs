//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Once;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Storage Metrics
    pub static ref STORAGE_OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cyclestore_storage_operations_total", "Total number of partition operations"),
        &["operation"]
    ).expect("metric can be created");
    pub static ref STORAGE_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cyclestore_storage_errors_total", "Total number of failed partition operations"),
        &["operation"]
    ).expect("metric can be created");

    // Cache Metrics
    pub static ref CACHE_HITS_TOTAL: IntCounter = IntCounter::new(
        "cyclestore_cache_hits_total",
        "Total number of fast-path cache hits"
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounter = IntCounter::new(
        "cyclestore_cache_misses_total",
        "Total number of fast-path cache misses"
    ).expect("metric can be created");

    // Backup Metrics
    pub static ref BACKUPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cyclestore_backups_total", "Total number of backups created"),
        &["trigger", "status"]
    ).expect("metric can be created");
    pub static ref BACKUPS_RETAINED: IntGauge = IntGauge::new(
        "cyclestore_backups_retained",
        "Number of backup records currently retained"
    ).expect("metric can be created");
    pub static ref RESTORES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cyclestore_restores_total", "Total number of restore attempts"),
        &["source", "status"]
    ).expect("metric can be created");
    pub static ref IMPORTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cyclestore_imports_total", "Total number of snapshot imports"),
        &["scope", "status"]
    ).expect("metric can be created");

    // Sync Metrics
    pub static ref SYNC_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cyclestore_sync_attempts_total", "Total number of sync attempts"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref SYNC_PENDING_CHANGES: IntGauge = IntGauge::new(
        "cyclestore_sync_pending_changes",
        "1 when local writes have not been synced yet"
    ).expect("metric can be created");

    // Event Metrics
    pub static ref EVENT_SUBSCRIBERS: IntGauge = IntGauge::new(
        "cyclestore_event_subscribers",
        "Number of live change subscriptions"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cyclestore_errors_total", "Total number of errors returned over HTTP"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(STORAGE_OPERATIONS_TOTAL.clone()))
            .expect("STORAGE_OPERATIONS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(STORAGE_ERRORS_TOTAL.clone()))
            .expect("STORAGE_ERRORS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_HITS_TOTAL.clone()))
            .expect("CACHE_HITS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_MISSES_TOTAL.clone()))
            .expect("CACHE_MISSES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(BACKUPS_TOTAL.clone()))
            .expect("BACKUPS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(BACKUPS_RETAINED.clone()))
            .expect("BACKUPS_RETAINED can be registered");
        REGISTRY
            .register(Box::new(RESTORES_TOTAL.clone()))
            .expect("RESTORES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(IMPORTS_TOTAL.clone()))
            .expect("IMPORTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(SYNC_ATTEMPTS_TOTAL.clone()))
            .expect("SYNC_ATTEMPTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(SYNC_PENDING_CHANGES.clone()))
            .expect("SYNC_PENDING_CHANGES can be registered");
        REGISTRY
            .register(Box::new(EVENT_SUBSCRIBERS.clone()))
            .expect("EVENT_SUBSCRIBERS can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}
