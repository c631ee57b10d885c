//! Common test utilities for E2E tests

use cyclestore::{AppState, config};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Cycle every test server starts in
pub const DEFAULT_CYCLE: &str = "متوسط";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    ///
    /// The sync client points at the server's own hub endpoints.
    pub async fn new() -> Self {
        cyclestore::metrics::init_metrics();

        // Create temporary directory for database, fallback copies and exports
        let temp_dir = TempDir::new().unwrap();

        // Bind to random port first so the sync URL is known
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let config = test_config(temp_dir.path(), &format!("{addr_str}/api"));

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        let app = cyclestore::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// URL of a partition collection in `cycle`
    pub fn partition_url(&self, store: &str, cycle: &str) -> reqwest::Url {
        reqwest::Url::parse_with_params(
            &self.url(&format!("/api/partitions/{store}")),
            &[("cycle", cycle)],
        )
        .unwrap()
    }

    /// Create a record through the API and return the stored record
    pub async fn create(&self, store: &str, cycle: &str, record: Value) -> Value {
        let response = self
            .client
            .post(self.partition_url(store, cycle))
            .json(&record)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201, "create in {store} failed");
        response.json().await.unwrap()
    }

    /// List the records of a partition
    pub async fn list(&self, store: &str, cycle: &str) -> Vec<Value> {
        let body: Value = self
            .client
            .get(self.partition_url(store, cycle))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["records"].as_array().cloned().unwrap_or_default()
    }
}

fn test_config(root: &std::path::Path, sync_url: &str) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let OS assign port
        },
        database: config::DatabaseConfig {
            path: root.join("test.db"),
        },
        cycle: config::CycleConfig {
            default: DEFAULT_CYCLE.to_string(),
            user_id: None,
        },
        backup: config::BackupConfig {
            enabled: false,
            interval_seconds: 30,
            retention_count: 10,
            version: "1.0".to_string(),
        },
        fallback: config::FallbackConfig {
            dir: root.join("fallback"),
            max_bytes: 5 * 1024 * 1024,
            max_copies: 5,
        },
        export: config::ExportConfig {
            dir: root.join("exports"),
            app_name: "appamine".to_string(),
            application: "Arabic School Management".to_string(),
        },
        sync: config::SyncConfig {
            enabled: false,
            server_url: sync_url.to_string(),
            interval_seconds: 60,
            max_retries: 0,
            retry_delay_seconds: 1,
            client_id: Some("client_test".to_string()),
        },
        cache: config::CacheConfig {
            max_entries: 256,
            ttl_seconds: 3600,
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}
