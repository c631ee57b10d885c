//! Sync hub
//!
//! Server side of the remote contract, so one daemon can serve as the
//! remote for others. Keeps only the most recent upload.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::remote::{SyncRequest, SyncResponse};
use crate::data::{PartitionHandle, Store};
use crate::error::AppError;
use crate::snapshot::Snapshot;

const HUB_NAMESPACE: &str = "syncHub";
const LATEST_KEY: &str = "latest";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredUpload {
    data: Snapshot,
    timestamp: i64,
    client_id: String,
}

pub struct SyncHub {
    store: Arc<Store>,
}

impl SyncHub {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn namespace(&self) -> PartitionHandle {
        self.store.system(HUB_NAMESPACE)
    }

    /// Replace the stored snapshot with this upload
    pub async fn upload(&self, request: SyncRequest) -> Result<SyncResponse, AppError> {
        let stored = StoredUpload {
            data: request.data,
            timestamp: request.timestamp,
            client_id: request.client_id,
        };
        self.namespace()
            .set(LATEST_KEY, &serde_json::to_value(&stored)?)
            .await?;

        tracing::info!(
            client_id = %stored.client_id,
            timestamp = stored.timestamp,
            "Sync upload stored"
        );
        Ok(SyncResponse::ok(None, Some(stored.timestamp)))
    }

    /// The most recent upload, if any
    pub async fn download(&self) -> Result<SyncResponse, AppError> {
        let Some(value) = self.namespace().get(LATEST_KEY).await? else {
            return Ok(SyncResponse::ok(None, None));
        };

        let stored: StoredUpload = serde_json::from_value(value)?;
        Ok(SyncResponse::ok(Some(stored.data), Some(stored.timestamp)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::tests::create_test_store;
    use serde_json::json;

    #[tokio::test]
    async fn download_returns_last_upload() {
        let (store, _temp_dir) = create_test_store().await;
        let hub = SyncHub::new(store);

        let empty = hub.download().await.unwrap();
        assert!(empty.success && empty.data.is_none());

        for (client, timestamp) in [("a", 10), ("b", 20)] {
            hub.upload(SyncRequest {
                data: Snapshot {
                    cycle: Some(client.to_string()),
                    students: vec![json!({"id": client})],
                    ..Snapshot::default()
                },
                timestamp,
                client_id: client.to_string(),
            })
            .await
            .unwrap();
        }

        let latest = hub.download().await.unwrap();
        assert_eq!(latest.timestamp, Some(20));
        assert_eq!(latest.data.unwrap().cycle.as_deref(), Some("b"));
    }
}
