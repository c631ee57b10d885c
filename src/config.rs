//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cycle: CycleConfig,
    pub backup: BackupConfig,
    pub fallback: FallbackConfig,
    pub export: ExportConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1")
    pub host: String,
    /// Port number (e.g., 3001)
    pub port: u16,
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Active cycle used by the background backup and sync tasks
#[derive(Debug, Clone, Deserialize)]
pub struct CycleConfig {
    /// Cycle name (e.g., "متوسط")
    pub default: String,
    /// Optional user scope appended to every partition namespace
    pub user_id: Option<String>,
}

/// Backup manager configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    /// Enable the periodic auto-backup task
    pub enabled: bool,
    /// Auto-backup interval in seconds (default: 30)
    pub interval_seconds: u64,
    /// Number of backup records to keep (default: 10)
    pub retention_count: usize,
    /// Version tag written into backup metadata
    pub version: String,
}

/// Size-capped secondary backup store
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
    /// Directory holding fallback copies
    pub dir: PathBuf,
    /// Total byte budget across all copies (default: 5 MiB)
    pub max_bytes: u64,
    /// Number of copies to keep (default: 5)
    pub max_copies: usize,
}

/// Downloadable export configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Directory receiving full export files
    pub dir: PathBuf,
    /// File name prefix (e.g., "appamine")
    pub app_name: String,
    /// Application label stored in export metadata
    pub application: String,
}

/// Sync coordinator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Enable the periodic sync task
    pub enabled: bool,
    /// Base URL of the remote API (e.g., "http://localhost:3001/api")
    pub server_url: String,
    /// Sync interval in seconds (default: 60)
    pub interval_seconds: u64,
    /// Retries after a failed scheduled attempt
    pub max_retries: u32,
    /// Delay between retries in seconds
    pub retry_delay_seconds: u64,
    /// Fixed client id; generated and persisted when absent
    pub client_id: Option<String>,
}

/// Fast-path cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached collections (default: 256)
    pub max_entries: u64,
    /// Entry TTL in seconds (default: 3600)
    pub ttl_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub fn default_filter(&self) -> String {
        format!("cyclestore={level},tower_http={level}", level = self.level)
    }

    pub fn is_json(&self) -> bool {
        self.format == "json"
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (CYCLESTORE__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3001)?
            .set_default("database.path", "data/cyclestore.db")?
            .set_default("cycle.default", "متوسط")?
            .set_default("backup.enabled", true)?
            .set_default("backup.interval_seconds", 30)?
            .set_default("backup.retention_count", 10)?
            .set_default("backup.version", "1.0")?
            .set_default("fallback.dir", "data/fallback")?
            .set_default("fallback.max_bytes", 5 * 1024 * 1024)?
            .set_default("fallback.max_copies", 5)?
            .set_default("export.dir", "data/exports")?
            .set_default("export.app_name", "appamine")?
            .set_default("export.application", "Arabic School Management")?
            .set_default("sync.enabled", false)?
            .set_default("sync.server_url", "http://localhost:3001/api")?
            .set_default("sync.interval_seconds", 60)?
            .set_default("sync.max_retries", 3)?
            .set_default("sync.retry_delay_seconds", 5)?
            .set_default("cache.max_entries", 256)?
            .set_default("cache.ttl_seconds", 3600)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (CYCLESTORE__*)
            .add_source(
                Environment::with_prefix("CYCLESTORE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Default cycle context for background tasks
    pub fn default_context(&self) -> crate::data::CycleContext {
        crate::data::CycleContext::new(&self.cycle.default, self.cycle.user_id.as_deref())
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        if self.cycle.default.trim().is_empty() {
            return Err(AppError::Config("cycle.default must not be empty".to_string()));
        }

        if self.backup.interval_seconds == 0 {
            return Err(AppError::Config(
                "backup.interval_seconds must be greater than 0".to_string(),
            ));
        }

        if self.backup.retention_count == 0 {
            return Err(AppError::Config(
                "backup.retention_count must be greater than 0".to_string(),
            ));
        }

        if self.fallback.max_copies == 0 {
            return Err(AppError::Config(
                "fallback.max_copies must be greater than 0".to_string(),
            ));
        }

        if self.sync.interval_seconds == 0 {
            return Err(AppError::Config(
                "sync.interval_seconds must be greater than 0".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(AppError::Config(format!(
                "logging.format must be \"pretty\" or \"json\", got {:?}",
                self.logging.format
            )));
        }

        if self.sync.enabled {
            url::Url::parse(&self.sync.server_url).map_err(|error| {
                AppError::Config(format!("sync.server_url is not a valid URL: {error}"))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config(root: &std::path::Path) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: DatabaseConfig {
            path: root.join("test.db"),
        },
        cycle: CycleConfig {
            default: "متوسط".to_string(),
            user_id: None,
        },
        backup: BackupConfig {
            enabled: false,
            interval_seconds: 30,
            retention_count: 10,
            version: "1.0".to_string(),
        },
        fallback: FallbackConfig {
            dir: root.join("fallback"),
            max_bytes: 5 * 1024 * 1024,
            max_copies: 5,
        },
        export: ExportConfig {
            dir: root.join("exports"),
            app_name: "appamine".to_string(),
            application: "Arabic School Management".to_string(),
        },
        sync: SyncConfig {
            enabled: false,
            server_url: "http://localhost:3001/api".to_string(),
            interval_seconds: 60,
            max_retries: 3,
            retry_delay_seconds: 5,
            client_id: None,
        },
        cache: CacheConfig {
            max_entries: 256,
            ttl_seconds: 3600,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn validate_accepts_defaults() {
        let config = test_config(Path::new("/tmp/cyclestore-test"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_retention() {
        let mut config = test_config(Path::new("/tmp/cyclestore-test"));
        config.backup.retention_count = 0;

        let error = config
            .validate()
            .expect_err("zero retention must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("backup.retention_count")
        ));
    }

    #[test]
    fn validate_rejects_invalid_sync_url_when_enabled() {
        let mut config = test_config(Path::new("/tmp/cyclestore-test"));
        config.sync.enabled = true;
        config.sync.server_url = "not a url".to_string();

        let error = config.validate().expect_err("invalid sync URL must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("sync.server_url")
        ));
    }

    #[test]
    fn validate_rejects_blank_cycle() {
        let mut config = test_config(Path::new("/tmp/cyclestore-test"));
        config.cycle.default = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn logging_section_drives_filter_and_format() {
        let mut config = test_config(Path::new("/tmp/cyclestore-test"));
        config.logging.level = "debug".to_string();
        config.logging.format = "json".to_string();

        assert_eq!(
            config.logging.default_filter(),
            "cyclestore=debug,tower_http=debug"
        );
        assert!(config.logging.is_json());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unknown_log_format() {
        let mut config = test_config(Path::new("/tmp/cyclestore-test"));
        config.logging.format = "xml".to_string();

        let error = config.validate().expect_err("unknown log format must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("logging.format")
        ));
    }
}
