//! Remote sync contract and its HTTP client

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::AppError;
use crate::snapshot::Snapshot;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Upload payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub data: Snapshot,
    /// Milliseconds since the epoch
    pub timestamp: i64,
    pub client_id: String,
}

/// Response of both remote endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Snapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl SyncResponse {
    pub fn ok(data: Option<Snapshot>, timestamp: Option<i64>) -> Self {
        Self {
            success: true,
            data,
            error: None,
            timestamp,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            timestamp: None,
        }
    }

    /// Convert a non-success response into `AppError::Sync`
    pub fn into_result(self) -> Result<Self, AppError> {
        if self.success {
            Ok(self)
        } else {
            Err(AppError::Sync(
                self.error
                    .unwrap_or_else(|| "remote reported failure".to_string()),
            ))
        }
    }
}

/// The remote counterpart a coordinator reconciles with
pub trait SyncRemote: Send + Sync {
    /// Upload the local snapshot
    fn upload(
        &self,
        request: &SyncRequest,
    ) -> impl Future<Output = Result<SyncResponse, AppError>> + Send;

    /// Fetch the remote's current snapshot
    fn download(&self) -> impl Future<Output = Result<SyncResponse, AppError>> + Send;

    /// Connectivity probe
    fn health(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// `SyncRemote` over HTTP
///
/// `POST {base}/sync/upload`, `GET {base}/sync/download`, `GET {base}/health`.
/// Only the health probe has a timeout.
#[derive(Clone)]
pub struct HttpSyncRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSyncRemote {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("cyclestore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn read_response(response: reqwest::Response) -> Result<SyncResponse, AppError> {
        let status = response.status();
        let body = response.text().await?;

        serde_json::from_str(&body).map_err(|_| {
            AppError::Sync(format!("remote returned HTTP {status} without a sync response"))
        })
    }
}

impl SyncRemote for HttpSyncRemote {
    async fn upload(&self, request: &SyncRequest) -> Result<SyncResponse, AppError> {
        let response = self
            .client
            .post(self.url("sync/upload"))
            .json(request)
            .send()
            .await?;
        Self::read_response(response).await
    }

    async fn download(&self) -> Result<SyncResponse, AppError> {
        let response = self.client.get(self.url("sync/download")).send().await?;
        Self::read_response(response).await
    }

    async fn health(&self) -> Result<(), AppError> {
        let response = self
            .client
            .get(self.url("health"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Sync(format!(
                "health check returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}
