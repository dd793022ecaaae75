//! Interfaces to the engine's external collaborators.
//!
//! The engine never talks to a concrete object store, data source, notifier or
//! metrics sink directly. Callers inject implementations of these traits into
//! [`crate::BackupEngine`]. Every method returns `anyhow::Result` so adapters
//! can attach whatever context their backend produces; the orchestrators wrap
//! those errors into the matching [`crate::BackupError`] variant.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::catalog::CatalogFilter;
use crate::model::{BackupMetadata, StorageLocation};

/// Receipt returned by a successful upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Storage-assigned object id
    pub id: String,
    pub location: StorageLocation,
    pub size: u64,
    /// Checksum as computed by the backend, if it computes one
    pub checksum: String,
}

/// Object storage holding backup artifacts
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Write an artifact under `destination`
    async fn upload(&self, artifact: Bytes, destination: &StorageLocation) -> Result<UploadReceipt>;

    /// Read an artifact back
    async fn download(&self, location: &StorageLocation) -> Result<Bytes>;

    /// Describe the artifacts the backend holds
    async fn list(&self, filter: &CatalogFilter) -> Result<Vec<BackupMetadata>>;

    /// Ask the backend whether the stored object matches `expected`
    async fn verify_checksum(&self, location: &StorageLocation, expected: &str) -> Result<bool>;

    /// Remove an artifact
    async fn delete(&self, location: &StorageLocation) -> Result<()>;
}

/// Outcome of importing one artifact into a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub records_imported: u64,
}

/// Outcome of validating one artifact without applying it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub estimated_records: u64,
    pub warnings: Vec<String>,
}

/// Source exporter and target importer for the protected data store
#[async_trait]
pub trait DataAdapter: Send + Sync {
    async fn export(
        &self,
        resource: &str,
        include_patterns: &[String],
        exclude_patterns: &[String],
    ) -> Result<Bytes>;

    async fn export_incremental(
        &self,
        resource: &str,
        last_backup_id: &str,
        include_patterns: &[String],
        exclude_patterns: &[String],
    ) -> Result<Bytes>;

    async fn import(
        &self,
        data: Bytes,
        target_location: &str,
        overwrite: bool,
        metadata: &BackupMetadata,
    ) -> Result<ImportOutcome>;

    async fn validate_import(&self, data: Bytes) -> Result<ValidationReport>;
}

/// What an alert is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    BackupCompleted,
    BackupFailed,
    RestoreCompleted,
    RestoreFailed,
    ChecksumMismatch,
    ReplicationDegraded,
    RetentionFailed,
}

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Alert handed to the notification adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub metadata: HashMap<String, String>,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            severity,
            title: title.into(),
            message: message.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Notification delivery (email, chat, webhook...)
#[async_trait]
pub trait NotificationAdapter: Send + Sync {
    async fn send_alert(&self, alert: Alert) -> Result<()>;
}

/// One measurement handed to the metrics adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub tags: HashMap<String, String>,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            tags: HashMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.tags.insert(key.into(), value.to_string());
        self
    }
}

/// Metrics sink
#[async_trait]
pub trait MetricsAdapter: Send + Sync {
    async fn record_metric(&self, metric: Metric) -> Result<()>;
}

/// Notifier that drops every alert
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationAdapter for NoopNotifier {
    async fn send_alert(&self, _alert: Alert) -> Result<()> {
        Ok(())
    }
}

/// Metrics sink that drops every measurement
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

#[async_trait]
impl MetricsAdapter for NoopMetrics {
    async fn record_metric(&self, _metric: Metric) -> Result<()> {
        Ok(())
    }
}
