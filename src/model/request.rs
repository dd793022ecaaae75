// Backup and restore requests, restore results

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::location::StorageLocation;
use super::metadata::{BackupType, RetentionClass};

/// Parameters for one `create_backup` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRequest {
    pub backup_type: BackupType,
    /// Source resource handed to the exporter (e.g. "database")
    pub resource: String,
    /// Destination prefix; the artifact is written to `destination/<backup id>`
    pub destination: StorageLocation,
    pub compression: bool,
    pub encryption: bool,
    pub retention_class: RetentionClass,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Explicit parent for incremental/differential backups
    pub last_backup_id: Option<String>,
    /// Overrides the engine-wide retry budget
    pub max_retries: Option<u32>,
}

impl BackupRequest {
    pub fn new(
        backup_type: BackupType,
        resource: impl Into<String>,
        destination: StorageLocation,
    ) -> Self {
        Self {
            backup_type,
            resource: resource.into(),
            destination,
            compression: true,
            encryption: false,
            retention_class: RetentionClass::Daily,
            tags: BTreeSet::new(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            last_backup_id: None,
            max_retries: None,
        }
    }

    pub fn full(resource: impl Into<String>, destination: StorageLocation) -> Self {
        Self::new(BackupType::Full, resource, destination)
    }

    pub fn incremental(resource: impl Into<String>, destination: StorageLocation) -> Self {
        Self::new(BackupType::Incremental, resource, destination)
    }

    pub fn differential(resource: impl Into<String>, destination: StorageLocation) -> Self {
        Self::new(BackupType::Differential, resource, destination)
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn with_encryption(mut self, enabled: bool) -> Self {
        self.encryption = enabled;
        self
    }

    pub fn with_retention_class(mut self, class: RetentionClass) -> Self {
        self.retention_class = class;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_parent(mut self, backup_id: impl Into<String>) -> Self {
        self.last_backup_id = Some(backup_id.into());
        self
    }

    pub fn with_include_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.include_patterns.push(pattern.into());
        self
    }

    pub fn with_exclude_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

/// Target description for one restore call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub target_location: String,
    pub overwrite: bool,
    pub verify_checksum: bool,
    pub dry_run: bool,
    /// Restore ancestors as well, even when the named backup is a chain root
    pub include_parent: bool,
    /// Apply only the named backup's own artifact, skipping its ancestors
    pub incremental_only: bool,
}

impl RestoreRequest {
    pub fn new(target_location: impl Into<String>) -> Self {
        Self {
            target_location: target_location.into(),
            overwrite: false,
            verify_checksum: true,
            dry_run: false,
            include_parent: true,
            incremental_only: false,
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_include_parent(mut self, include: bool) -> Self {
        self.include_parent = include;
        self
    }

    pub fn with_incremental_only(mut self, only: bool) -> Self {
        self.incremental_only = only;
        self
    }
}

/// Outcome status of a restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    Completed,
    DryRunSuccess,
}

/// Result of a successful restore or dry run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    pub job_id: String,
    pub status: RestoreStatus,
    /// Sum of records imported across the chain (zero for dry runs)
    pub restored_records: u64,
    /// Sum of records the validator expects across the chain (dry runs only)
    pub estimated_records: u64,
    pub target_location: String,
    /// Backup ids applied, oldest first
    pub chain: Vec<String>,
    /// Validator warnings gathered during a dry run
    pub warnings: Vec<String>,
}
