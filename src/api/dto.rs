//! Request and response DTOs

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `?cycle=&userId=` on cycle-scoped routes
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextParams {
    pub cycle: Option<String>,
    pub user_id: Option<String>,
}

/// List response of a partition
#[derive(Debug, Serialize)]
pub struct RecordsResponse {
    pub partition: String,
    pub cycle: Option<String>,
    pub count: usize,
    pub records: Vec<Value>,
}

/// Body of `POST /api/partitions/:store/bulk`
#[derive(Debug, Deserialize)]
pub struct BulkUpsertRequest {
    pub records: Vec<Value>,
}

/// Count of written or removed records
#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
}

/// Generic success/failure indicator for manual operations
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub result: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn ok(result: T) -> Self {
        Self {
            success: true,
            result,
        }
    }
}

/// Result of the integrity check
#[derive(Debug, Serialize)]
pub struct IntegrityResponse {
    pub valid: bool,
}

/// Body of `POST /api/sync/connectivity`
#[derive(Debug, Deserialize)]
pub struct ConnectivityRequest {
    pub online: bool,
}

/// Body of `POST /api/lifecycle`
#[derive(Debug, Deserialize)]
pub struct LifecycleRequest {
    pub event: crate::storage::LifecycleEvent,
}
