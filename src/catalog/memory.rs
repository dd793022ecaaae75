use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use super::CatalogRepository;
use crate::model::{BackupMetadata, BackupStatus};
use crate::{BackupError, Result};

/// In-memory catalog storage
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    records: Arc<DashMap<String, BackupMetadata>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalog {
    async fn insert(&self, metadata: BackupMetadata) -> Result<()> {
        match self.records.entry(metadata.id.clone()) {
            Entry::Occupied(_) => Err(BackupError::Catalog(format!(
                "backup {} is already cataloged",
                metadata.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(metadata);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<BackupMetadata>> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn update_status(
        &self,
        id: &str,
        status: BackupStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| BackupError::NotFound(format!("backup {}", id)))?;
        record.status = status;
        record.completed_at = completed_at;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<BackupMetadata>> {
        Ok(self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.records.remove(id).is_some())
    }
}
