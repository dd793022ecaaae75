//! Backup catalog: the durable registry of backup metadata.
//!
//! Persistence goes through a single [`CatalogRepository`] trait so the same
//! catalog logic runs against memory, local files, or any other store.

mod file;
mod memory;

pub use file::FileCatalog;
pub use memory::InMemoryCatalog;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapters::StorageAdapter;
use crate::model::{BackupMetadata, BackupStatus, BackupType};
use crate::{BackupError, Result};

/// Storage backend for catalog records, keyed by backup id
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Insert a new record; fails if the id already exists
    async fn insert(&self, metadata: BackupMetadata) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<BackupMetadata>>;

    /// Replace the stored status (and completion time) of an existing record
    async fn update_status(
        &self,
        id: &str,
        status: BackupStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn list(&self) -> Result<Vec<BackupMetadata>>;

    /// Remove a record; returns whether it existed
    async fn remove(&self, id: &str) -> Result<bool>;
}

/// Query over catalog records; unset fields match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFilter {
    pub resource: Option<String>,
    pub backup_types: Option<Vec<BackupType>>,
    pub status: Option<BackupStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl CatalogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn backup_type(mut self, backup_type: BackupType) -> Self {
        self.backup_types
            .get_or_insert_with(Vec::new)
            .push(backup_type);
        self
    }

    pub fn status(mut self, status: BackupStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn created_between(mut self, after: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        self.created_after = Some(after);
        self.created_before = Some(before);
        self
    }

    pub fn size_between(mut self, min: u64, max: u64) -> Self {
        self.min_size = Some(min);
        self.max_size = Some(max);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn matches(&self, meta: &BackupMetadata) -> bool {
        if let Some(ref resource) = self.resource {
            if &meta.source_resource != resource {
                return false;
            }
        }
        if let Some(ref types) = self.backup_types {
            if !types.contains(&meta.backup_type) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if meta.status != status {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if meta.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if meta.created_at > before {
                return false;
            }
        }
        if let Some(min) = self.min_size {
            if meta.size_bytes < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if meta.size_bytes > max {
                return false;
            }
        }
        self.tags.is_subset(&meta.tags)
    }
}

/// Registry of backup metadata with chain resolution
#[derive(Clone)]
pub struct BackupCatalog {
    repository: Arc<dyn CatalogRepository>,
}

impl BackupCatalog {
    pub fn new(repository: Arc<dyn CatalogRepository>) -> Self {
        Self { repository }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCatalog::new()))
    }

    /// Register a new backup.
    ///
    /// The record must have a valid parent shape, and a named parent must
    /// already be cataloged and completed.
    pub async fn register(&self, metadata: BackupMetadata) -> Result<()> {
        metadata.validate_shape()?;

        if let Some(ref parent_id) = metadata.parent_backup_id {
            let parent = self.repository.get(parent_id).await?.ok_or_else(|| {
                BackupError::ChainResolution(format!(
                    "parent {} of backup {} is not cataloged",
                    parent_id, metadata.id
                ))
            })?;
            if !parent.is_completed() {
                return Err(BackupError::ChainResolution(format!(
                    "parent {} of backup {} is {}, not completed",
                    parent_id, metadata.id, parent.status
                )));
            }
        }

        debug!(backup_id = %metadata.id, backup_type = %metadata.backup_type, "Registering backup");
        self.repository.insert(metadata).await
    }

    pub async fn get(&self, id: &str) -> Result<BackupMetadata> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| BackupError::NotFound(format!("backup {}", id)))
    }

    /// Matching records, newest first
    pub async fn find(&self, filter: &CatalogFilter) -> Result<Vec<BackupMetadata>> {
        let mut records: Vec<BackupMetadata> = self
            .repository
            .list()
            .await?
            .into_iter()
            .filter(|meta| filter.matches(meta))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Most recent completed backup of `resource` whose type is in `types`
    pub async fn latest_completed(
        &self,
        resource: &str,
        types: &[BackupType],
    ) -> Result<Option<BackupMetadata>> {
        let mut filter = CatalogFilter::new()
            .resource(resource)
            .status(BackupStatus::Completed);
        filter.backup_types = Some(types.to_vec());
        Ok(self.find(&filter).await?.into_iter().next())
    }

    /// Walk parent links from `id` back to its chain root.
    ///
    /// Returns the chain oldest first, ending with `id` itself.
    pub async fn resolve_chain(&self, id: &str) -> Result<Vec<BackupMetadata>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current_id = id.to_string();

        loop {
            if !seen.insert(current_id.clone()) {
                return Err(BackupError::ChainResolution(format!(
                    "cycle detected at backup {} while resolving {}",
                    current_id, id
                )));
            }

            let meta = self.repository.get(&current_id).await?.ok_or_else(|| {
                BackupError::ChainResolution(format!(
                    "backup {} in the chain of {} is missing",
                    current_id, id
                ))
            })?;

            if !meta.is_completed() {
                return Err(BackupError::ChainResolution(format!(
                    "backup {} in the chain of {} is {}, not completed",
                    meta.id, id, meta.status
                )));
            }

            match meta.parent_backup_id.clone() {
                Some(parent_id) => {
                    chain.push(meta);
                    current_id = parent_id;
                }
                None => {
                    if meta.backup_type.requires_parent() {
                        return Err(BackupError::ChainResolution(format!(
                            "{} backup {} has no parent",
                            meta.backup_type, meta.id
                        )));
                    }
                    chain.push(meta);
                    break;
                }
            }
        }

        chain.reverse();
        Ok(chain)
    }

    /// Move a record forward through its lifecycle
    pub async fn update_status(&self, id: &str, status: BackupStatus) -> Result<BackupMetadata> {
        let mut meta = self.get(id).await?;
        meta.transition(status)?;
        self.repository
            .update_status(id, meta.status, meta.completed_at)
            .await?;
        Ok(meta)
    }

    /// Completed backups whose parent is `id`
    pub async fn children(&self, id: &str) -> Result<Vec<BackupMetadata>> {
        Ok(self
            .repository
            .list()
            .await?
            .into_iter()
            .filter(|meta| meta.is_completed() && meta.parent_backup_id.as_deref() == Some(id))
            .collect())
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        if self.repository.remove(id).await? {
            Ok(())
        } else {
            Err(BackupError::NotFound(format!("backup {}", id)))
        }
    }

    /// Re-register completed artifacts the storage backend knows about but the
    /// catalog has lost. Parents are registered before their children.
    pub async fn rebuild_from_storage(&self, storage: &dyn StorageAdapter) -> Result<usize> {
        let filter = CatalogFilter::new().status(BackupStatus::Completed);
        let mut listed = storage
            .list(&filter)
            .await
            .map_err(|e| BackupError::Catalog(format!("Failed to list storage: {:#}", e)))?;
        listed.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut restored = 0;
        for meta in listed {
            if !meta.is_completed() || self.repository.get(&meta.id).await?.is_some() {
                continue;
            }
            let id = meta.id.clone();
            match self.register(meta).await {
                Ok(()) => restored += 1,
                Err(e) => warn!(backup_id = %id, error = %e, "Skipping unrecoverable catalog record"),
            }
        }

        info!(restored = restored, "Catalog rebuilt from storage listing");
        Ok(restored)
    }
}
