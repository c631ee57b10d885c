//! SQLite database operations
//!
//! All keyed storage goes through this module. Every partition, backup
//! record and metadata entry is a row of the `records` table addressed by
//! `(namespace, key)`; each row write is atomic on its own and nothing
//! here spans namespaces.

use chrono::Utc;
use futures::stream::BoxStream;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

const UPSERT_RECORD: &str = "INSERT INTO records (namespace, key, value, updated_at)
     VALUES (?, ?, ?, ?)
     ON CONFLICT(namespace, key)
     DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }

    /// Close the pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // =========================================================================
    // Keyed records
    // =========================================================================

    /// Get the raw JSON value stored under `(namespace, key)`
    pub async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, AppError> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM records WHERE namespace = ? AND key = ?",
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    /// Insert or replace one record
    pub async fn put(&self, namespace: &str, key: &str, value: &str) -> Result<(), AppError> {
        sqlx::query(
            UPSERT_RECORD,
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or replace several records of one namespace in a single transaction
    pub async fn put_many(
        &self,
        namespace: &str,
        entries: &[(String, String)],
    ) -> Result<(), AppError> {
        if entries.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query(
                UPSERT_RECORD,
            )
            .bind(namespace)
            .bind(key)
            .bind(value)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Delete one record. Missing keys are not an error.
    pub async fn delete(&self, namespace: &str, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM records WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete every record of one namespace, returning how many were removed
    pub async fn clear(&self, namespace: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM records WHERE namespace = ?")
            .bind(namespace)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Count records in one namespace
    pub async fn count(&self, namespace: &str) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM records WHERE namespace = ?")
            .bind(namespace)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// List keys of one namespace in key order
    pub async fn keys(&self, namespace: &str) -> Result<Vec<String>, AppError> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM records WHERE namespace = ? ORDER BY key",
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    /// Stream `(key, value)` rows of one namespace in key order
    ///
    /// Rows are pulled from SQLite as the stream is polled, so dropping
    /// the stream early stops the scan.
    pub fn stream<'a>(
        &'a self,
        namespace: &'a str,
    ) -> BoxStream<'a, Result<(String, String), sqlx::Error>> {
        sqlx::query_as::<_, (String, String)>(
            "SELECT key, value FROM records WHERE namespace = ? ORDER BY key",
        )
        .bind(namespace)
        .fetch(&self.pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    /// Helper to create a test database
    async fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::connect(&db_path).await.unwrap();
        (db, temp_dir)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (db, _temp_dir) = create_test_db().await;

        db.put("ns", "a", r#"{"id":"a"}"#).await.unwrap();
        assert_eq!(
            db.get("ns", "a").await.unwrap().as_deref(),
            Some(r#"{"id":"a"}"#)
        );

        db.put("ns", "a", r#"{"id":"a","v":2}"#).await.unwrap();
        assert_eq!(db.count("ns").await.unwrap(), 1);

        db.delete("ns", "a").await.unwrap();
        assert!(db.get("ns", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_namespaces_do_not_share_rows() {
        let (db, _temp_dir) = create_test_db().await;

        db.put("left", "k", "1").await.unwrap();
        db.put("right", "k", "2").await.unwrap();

        assert_eq!(db.clear("left").await.unwrap(), 1);
        assert!(db.get("left", "k").await.unwrap().is_none());
        assert_eq!(db.get("right", "k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_put_many_and_stream_in_key_order() {
        let (db, _temp_dir) = create_test_db().await;

        let entries = vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
            ("c".to_string(), "3".to_string()),
        ];
        db.put_many("ns", &entries).await.unwrap();

        let rows: Vec<(String, String)> = db.stream("ns").try_collect().await.unwrap();
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(db.keys("ns").await.unwrap(), vec!["a", "b", "c"]);
    }
}
