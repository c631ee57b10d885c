//! Full downloadable export

use chrono::Utc;
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::snapshot::{Snapshot, SnapshotDocument, export_filename};

/// Writes wrapped export documents to the export directory
pub struct FileExporter {
    dir: PathBuf,
    app_name: String,
    application: String,
    version: String,
}

impl FileExporter {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            dir: config.export.dir.clone(),
            app_name: config.export.app_name.clone(),
            application: config.export.application.clone(),
            version: config.backup.version.clone(),
        }
    }

    /// Wrap a snapshot for download, returning the file name and document
    pub fn document(&self, snapshot: Snapshot) -> Result<(String, SnapshotDocument), AppError> {
        let document = SnapshotDocument::wrap(snapshot, &self.version, &self.application)?;
        Ok((export_filename(&self.app_name, Utc::now()), document))
    }

    /// Write a wrapped export file and return its path
    pub async fn write(&self, snapshot: Snapshot) -> Result<PathBuf, AppError> {
        let (file_name, document) = self.document(snapshot)?;
        let payload = serde_json::to_vec_pretty(&document)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(file_name);
        tokio::fs::write(&path, payload).await?;

        tracing::info!(path = %path.display(), "Export written");
        Ok(path)
    }
}
