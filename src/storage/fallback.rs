//! Fallback backup store
//!
//! A directory of rolling snapshot copies named
//! `<app>_backup_<cycle>_<millis>.json`, capped both in count and in total
//! bytes. Oldest copies are evicted first.

use serde::Serialize;
use std::path::PathBuf;

use super::MonotonicClock;
use crate::config::FallbackConfig;
use crate::error::AppError;
use crate::snapshot::Snapshot;

const FILE_EXTENSION: &str = ".json";

/// One retained fallback copy
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackEntry {
    pub key: String,
    pub cycle: String,
    pub timestamp: i64,
    pub size: u64,
}

/// Size-capped secondary copy store
pub struct FallbackStore {
    dir: PathBuf,
    prefix: String,
    max_bytes: u64,
    max_copies: usize,
    clock: MonotonicClock,
}

impl FallbackStore {
    pub fn new(config: &FallbackConfig, app_name: &str) -> Self {
        Self {
            dir: config.dir.clone(),
            prefix: format!("{app_name}_backup_"),
            max_bytes: config.max_bytes,
            max_copies: config.max_copies.max(1),
            clock: MonotonicClock::default(),
        }
    }

    /// Write a copy of `snapshot`, evicting old copies to stay in budget
    ///
    /// Fails with `StorageUnavailable` when the copy alone exceeds the byte
    /// budget.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<String, AppError> {
        let payload = serde_json::to_vec(snapshot)?;
        let size = payload.len() as u64;
        if size > self.max_bytes {
            tracing::warn!(size, max_bytes = self.max_bytes, "Fallback copy exceeds quota");
            return Err(AppError::StorageUnavailable(format!(
                "fallback copy of {size} bytes exceeds the {} byte quota",
                self.max_bytes
            )));
        }

        tokio::fs::create_dir_all(&self.dir).await?;

        // Oldest last
        let mut retained = self.list().await?;
        if let Some(newest) = retained.first() {
            self.clock.observe(newest.timestamp);
        }
        while retained.len() >= self.max_copies
            || retained.iter().map(|e| e.size).sum::<u64>() + size > self.max_bytes
        {
            let Some(oldest) = retained.pop() else {
                break;
            };
            self.remove(&oldest.key).await?;
        }

        let cycle = snapshot.cycle.as_deref().unwrap_or_default();
        let key = format!(
            "{}{}_{}",
            self.prefix,
            encode_cycle(cycle),
            self.clock.next_millis()
        );
        let path = self.path_for(&key);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, &payload).await?;
        tokio::fs::rename(&staging, &path).await?;

        tracing::info!(key = %key, size, "Fallback copy written");
        Ok(key)
    }

    /// Retained copies, newest first
    pub async fn list(&self) -> Result<Vec<FallbackEntry>, AppError> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(error) => return Err(error.into()),
        };

        while let Some(item) = dir.next_entry().await? {
            let file_name = item.file_name();
            let Some(key) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(FILE_EXTENSION))
            else {
                continue;
            };
            let Some((cycle, timestamp)) = self.parse_key(key) else {
                continue;
            };

            entries.push(FallbackEntry {
                key: key.to_string(),
                cycle,
                timestamp,
                size: item.metadata().await?.len(),
            });
        }

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    /// Load one copy; `SnapshotNotFound` when the key is unknown
    pub async fn load(&self, key: &str) -> Result<Snapshot, AppError> {
        if self.parse_key(key).is_none() {
            return Err(AppError::SnapshotNotFound(key.to_string()));
        }

        let bytes = match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::SnapshotNotFound(key.to_string()));
            }
            Err(error) => return Err(error.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn remove(&self, key: &str) -> Result<(), AppError> {
        tracing::info!(key = %key, "Evicting fallback copy");
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{FILE_EXTENSION}"))
    }

    /// `(cycle, timestamp)` of a well-formed key
    fn parse_key(&self, key: &str) -> Option<(String, i64)> {
        if key.contains(['/', '\\']) {
            return None;
        }
        let rest = key.strip_prefix(&self.prefix)?;
        let (encoded_cycle, timestamp) = rest.rsplit_once('_')?;
        let timestamp = timestamp.parse().ok()?;
        Some((decode_cycle(encoded_cycle), timestamp))
    }
}

fn encode_cycle(cycle: &str) -> String {
    url::form_urlencoded::byte_serialize(cycle.as_bytes()).collect()
}

fn decode_cycle(encoded: &str) -> String {
    url::form_urlencoded::parse(encoded.as_bytes())
        .next()
        .map(|(cycle, _)| cycle.into_owned())
        .unwrap_or_default()
}
