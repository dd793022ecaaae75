// File-backed catalog - one JSON document per backup record

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

use super::CatalogRepository;
use crate::model::{BackupMetadata, BackupStatus};
use crate::{BackupError, Result};

const RECORD_EXTENSION: &str = "metadata";

/// Catalog persisted as `<id>.metadata` files under one directory.
///
/// Writes go to a temporary file first and are renamed into place, so a crash
/// never leaves a half-written record behind.
pub struct FileCatalog {
    directory: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCatalog {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    async fn ensure_directory_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.directory).await.map_err(|e| {
            BackupError::Catalog(format!("Failed to create catalog directory: {}", e))
        })
    }

    /// Absent paths are `false`; any other I/O failure is an error
    async fn exists(path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(|e| {
            BackupError::Catalog(format!("Failed to inspect {}: {}", path.display(), e))
        })
    }

    fn record_path(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(BackupError::Catalog(format!(
                "backup id '{}' cannot be used as a catalog key",
                id
            )));
        }
        Ok(self.directory.join(format!("{}.{}", id, RECORD_EXTENSION)))
    }

    async fn read_record(&self, path: &Path) -> Result<BackupMetadata> {
        let json = fs::read_to_string(path)
            .await
            .map_err(|e| BackupError::Catalog(format!("Failed to read catalog record: {}", e)))?;
        Ok(serde_json::from_str(&json)?)
    }

    async fn write_record(&self, metadata: &BackupMetadata) -> Result<()> {
        let path = self.record_path(&metadata.id)?;
        let temp_path = path.with_extension(format!("{}.tmp", RECORD_EXTENSION));
        let json = serde_json::to_string_pretty(metadata)?;

        fs::write(&temp_path, json)
            .await
            .map_err(|e| BackupError::Catalog(format!("Failed to write catalog record: {}", e)))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| BackupError::Catalog(format!("Failed to commit catalog record: {}", e)))
    }
}

#[async_trait]
impl CatalogRepository for FileCatalog {
    async fn insert(&self, metadata: BackupMetadata) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.ensure_directory_exists().await?;

        let path = self.record_path(&metadata.id)?;
        if Self::exists(&path).await? {
            return Err(BackupError::Catalog(format!(
                "backup {} is already cataloged",
                metadata.id
            )));
        }
        self.write_record(&metadata).await
    }

    async fn get(&self, id: &str) -> Result<Option<BackupMetadata>> {
        let path = self.record_path(id)?;
        if !Self::exists(&path).await? {
            return Ok(None);
        }
        self.read_record(&path).await.map(Some)
    }

    async fn update_status(
        &self,
        id: &str,
        status: BackupStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .get(id)
            .await?
            .ok_or_else(|| BackupError::NotFound(format!("backup {}", id)))?;
        record.status = status;
        record.completed_at = completed_at;
        self.write_record(&record).await
    }

    async fn list(&self) -> Result<Vec<BackupMetadata>> {
        if !Self::exists(&self.directory).await? {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.directory)
            .await
            .map_err(|e| BackupError::Catalog(format!("Failed to read catalog directory: {}", e)))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BackupError::Catalog(format!("Failed to read directory entry: {}", e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match self.read_record(&path).await {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable catalog record"),
            }
        }
        Ok(records)
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(id)?;
        if !Self::exists(&path).await? {
            return Ok(false);
        }
        fs::remove_file(&path)
            .await
            .map_err(|e| BackupError::Catalog(format!("Failed to delete catalog record: {}", e)))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::completed;
    use crate::catalog::BackupCatalog;
    use crate::model::BackupType;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let catalog = BackupCatalog::new(Arc::new(FileCatalog::new(dir.path())));
            catalog
                .register(completed("full-1", BackupType::Full, None, 2))
                .await
                .unwrap();
            catalog
                .register(completed("inc-1", BackupType::Incremental, Some("full-1"), 1))
                .await
                .unwrap();
        }

        let reopened = BackupCatalog::new(Arc::new(FileCatalog::new(dir.path())));
        let chain = reopened.resolve_chain("inc-1").await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].id, "full-1");
        assert_eq!(chain[1].checksum, "checksum-inc-1");
    }

    #[tokio::test]
    async fn test_insert_remove_and_ignore_foreign_files() {
        let dir = TempDir::new().unwrap();
        let repo = FileCatalog::new(dir.path());
        repo.insert(completed("full-1", BackupType::Full, None, 1))
            .await
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a record").unwrap();

        assert!(repo
            .insert(completed("full-1", BackupType::Full, None, 1))
            .await
            .is_err());
        assert_eq!(repo.list().await.unwrap().len(), 1);

        assert!(repo.remove("full-1").await.unwrap());
        assert!(!repo.remove("full-1").await.unwrap());
        assert!(repo.get("full-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = TempDir::new().unwrap();
        let repo = FileCatalog::new(dir.path());
        assert!(repo.get("../escape").await.is_err());
        assert!(repo.get("").await.is_err());
    }

    #[tokio::test]
    async fn test_unreadable_location_is_an_error_not_a_miss() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "regular file").unwrap();
        let repo = FileCatalog::new(blocker.join("catalog"));

        assert!(matches!(repo.get("full-1").await, Err(BackupError::Catalog(_))));
        assert!(matches!(repo.remove("full-1").await, Err(BackupError::Catalog(_))));
        assert!(matches!(repo.list().await, Err(BackupError::Catalog(_))));
    }

    #[tokio::test]
    async fn test_missing_directory_lists_empty() {
        let dir = TempDir::new().unwrap();
        let repo = FileCatalog::new(dir.path().join("not-yet-created"));
        assert!(repo.list().await.unwrap().is_empty());
    }
}
