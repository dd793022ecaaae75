//! # Backup Engine
//!
//! Snapshot backups of a transactional data store with incremental chains,
//! compress-then-encrypt artifacts, content checksums and verifiable restores.
//!
//! ## Overview
//!
//! A [`BackupEngine`] owns one instance of every component: the transform
//! pipeline, the backup catalog, the retention manager and the replication
//! coordinator. Callers reach them only through the engine's backup and
//! restore operations. The data source, object storage, notification delivery
//! and metrics sink are injected as trait objects (see [`adapters`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use backup_engine::{BackupEngine, BackupRequest, RestoreRequest, StorageLocation};
//! # use backup_engine::adapters::{DataAdapter, StorageAdapter};
//! # async fn example(
//! #     storage: Arc<dyn StorageAdapter>,
//! #     data: Arc<dyn DataAdapter>,
//! # ) -> backup_engine::Result<()> {
//! let engine = BackupEngine::builder(storage, data).build()?;
//!
//! let job = engine
//!     .create_backup(BackupRequest::full("database", StorageLocation::local("/var/backups")))
//!     .await?;
//! let backup_id = job.backup.as_ref().map(|b| b.id.clone()).unwrap_or_default();
//!
//! let restored = engine
//!     .restore_backup(&backup_id, RestoreRequest::new("staging"))
//!     .await?;
//! println!("restored {} records", restored.restored_records);
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`transform`]: compression and encryption stages, checksums
//! - [`catalog`]: backup metadata registry and chain resolution
//! - [`retention`]: deletion planning under a multi-tier policy
//! - [`replication`]: replica fan-out to secondary and tertiary locations
//! - [`orchestrator`]: backup and restore lifecycles, the engine itself

use std::time::Duration;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, BackupError>;

/// Main error type for backup and restore operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// Invalid request, policy or configuration
    #[error("Configuration error: {0}")]
    ConfigValidation(String),

    /// Missing, incomplete or cyclic parent links
    #[error("Chain resolution error: {0}")]
    ChainResolution(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Download error: {0}")]
    Download(String),

    /// Stored artifact does not match its cataloged checksum
    #[error("Checksum mismatch for backup {backup_id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        backup_id: String,
        expected: String,
        actual: String,
    },

    /// A replica could not be written; never fails a job on its own
    #[error("Replication to {location} failed: {reason}")]
    Replication { location: String, reason: String },

    #[error("Timed out after {waited:?} waiting for the {key} lock")]
    LockTimeout { key: String, waited: Duration },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Catalog storage failure
    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// Source or storage I/O failures that may succeed on another attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackupError::Export(_)
                | BackupError::Import(_)
                | BackupError::Upload(_)
                | BackupError::Download(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BackupError::Timeout { .. })
    }

    /// Stable label for metrics and alert metadata
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::ConfigValidation(_) => "config_validation",
            BackupError::ChainResolution(_) => "chain_resolution",
            BackupError::Export(_) => "export",
            BackupError::Import(_) => "import",
            BackupError::Compression(_) => "compression",
            BackupError::Encryption(_) => "encryption",
            BackupError::Upload(_) => "upload",
            BackupError::Download(_) => "download",
            BackupError::ChecksumMismatch { .. } => "checksum_mismatch",
            BackupError::Replication { .. } => "replication",
            BackupError::LockTimeout { .. } => "lock_timeout",
            BackupError::Timeout { .. } => "timeout",
            BackupError::NotFound(_) => "not_found",
            BackupError::Catalog(_) => "catalog",
            BackupError::Serialization(_) => "serialization",
            BackupError::Io(_) => "io",
        }
    }
}

/// External collaborator interfaces
pub mod adapters;

/// Backup metadata registry
pub mod catalog;

/// Engine configuration
pub mod config;

/// Outbound alert and metric dispatch
pub mod events;

/// Locks, retries, progress and the job archive
pub mod jobs;

/// Prometheus metrics
pub mod metrics;

/// Data model
pub mod model;

/// Backup and restore orchestration
pub mod orchestrator;

/// Replica fan-out
pub mod replication;

/// Retention planning
pub mod retention;

/// Tracing setup
pub mod telemetry;

/// Artifact transforms
pub mod transform;

pub use config::{EngineConfig, RetryPolicy};
pub use model::{
    BackupJob, BackupMetadata, BackupRequest, BackupStatus, BackupType, RestoreRequest,
    RestoreResult, RestoreStatus, RetentionClass, StorageLocation,
};
pub use orchestrator::{BackupEngine, BackupEngineBuilder};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BackupError::Upload("reset".into()).is_transient());
        assert!(BackupError::Download("reset".into()).is_transient());
        assert!(!BackupError::Encryption("bad tag".into()).is_transient());
        assert!(!BackupError::ChecksumMismatch {
            backup_id: "b".into(),
            expected: "x".into(),
            actual: "y".into(),
        }
        .is_transient());
    }

    #[test]
    fn test_error_kinds_are_stable() {
        let err = BackupError::LockTimeout {
            key: "resource database".into(),
            waited: Duration::from_secs(30),
        };
        assert_eq!(err.kind(), "lock_timeout");
        assert_eq!(
            err.to_string(),
            "Timed out after 30s waiting for the resource database lock"
        );
    }
}
