//! Backup storage module
//!
//! Handles:
//! - Backup records inside the database (bounded history)
//! - Size-capped fallback copies on disk
//! - Full downloadable exports

mod backup;
mod export;
mod fallback;

pub use backup::{
    BackupManager, BackupMetadata, BackupTrigger, LifecycleEvent, LifecycleReport,
    ManualBackupReport,
};
pub use export::FileExporter;
pub use fallback::{FallbackEntry, FallbackStore};

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Millisecond clock that never returns the same value twice
///
/// Backup ids and fallback keys embed the timestamp, so two backups taken
/// within the same millisecond must still get distinct ids.
#[derive(Debug, Default)]
pub(crate) struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    /// Never hand out `millis` or anything before it
    pub(crate) fn observe(&self, millis: i64) {
        self.last.fetch_max(millis, Ordering::SeqCst);
    }

    pub(crate) fn next_millis(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }
}
