// Backup metadata - identity and provenance of one backup artifact

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::location::StorageLocation;
use crate::{BackupError, Result};

/// Kind of backup artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    /// Complete, parent-less copy of a resource
    Full,
    /// Changes since the immediately preceding backup of any type
    Incremental,
    /// Changes since the last full backup
    Differential,
    /// Point-in-time copy, parent-less like a full backup
    Snapshot,
}

impl BackupType {
    /// Incremental and differential backups always carry a parent
    pub fn requires_parent(&self) -> bool {
        matches!(self, BackupType::Incremental | BackupType::Differential)
    }

    /// Full and snapshot backups start a chain
    pub fn is_chain_root(&self) -> bool {
        !self.requires_parent()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Incremental => "incremental",
            BackupType::Differential => "differential",
            BackupType::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(BackupType::Full),
            "incremental" => Ok(BackupType::Incremental),
            "differential" => Ok(BackupType::Differential),
            "snapshot" => Ok(BackupType::Snapshot),
            other => Err(BackupError::ConfigValidation(format!(
                "unknown backup type '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle status shared by backups and jobs.
///
/// Transitions only move forward: `Pending -> Running -> {Completed, Failed, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BackupStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackupStatus::Completed | BackupStatus::Failed | BackupStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: BackupStatus) -> bool {
        match (self, next) {
            (BackupStatus::Pending, BackupStatus::Running) => true,
            // A job may be abandoned before it ever starts running
            (BackupStatus::Pending, BackupStatus::Failed | BackupStatus::Cancelled) => true,
            (BackupStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Running => "running",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
            BackupStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retention bucket governing how many backups of a cadence are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionClass {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Permanent,
}

impl RetentionClass {
    pub const ALL: [RetentionClass; 5] = [
        RetentionClass::Daily,
        RetentionClass::Weekly,
        RetentionClass::Monthly,
        RetentionClass::Yearly,
        RetentionClass::Permanent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionClass::Daily => "daily",
            RetentionClass::Weekly => "weekly",
            RetentionClass::Monthly => "monthly",
            RetentionClass::Yearly => "yearly",
            RetentionClass::Permanent => "permanent",
        }
    }
}

impl fmt::Display for RetentionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetentionClass {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        RetentionClass::ALL
            .iter()
            .copied()
            .find(|class| class.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                BackupError::ConfigValidation(format!("unknown retention class '{}'", s))
            })
    }
}

/// Catalog record for one backup artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub backup_type: BackupType,
    pub status: BackupStatus,
    pub size_bytes: u64,
    /// SHA-256 of the final (post-transform) artifact, hex encoded
    pub checksum: String,
    pub encrypted: bool,
    pub compressed: bool,
    pub source_resource: String,
    pub destination: StorageLocation,
    pub parent_backup_id: Option<String>,
    pub retention_class: RetentionClass,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl BackupMetadata {
    /// Move the record forward through its lifecycle.
    ///
    /// Stamps `completed_at` when the backup reaches `Completed`.
    pub fn transition(&mut self, next: BackupStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(BackupError::ConfigValidation(format!(
                "backup {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        if next == BackupStatus::Completed {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.status == BackupStatus::Completed
    }

    /// Checks the parent-link shape: roots never have a parent, deltas always do
    pub fn validate_shape(&self) -> Result<()> {
        match (&self.parent_backup_id, self.backup_type.requires_parent()) {
            (Some(parent), false) => Err(BackupError::ConfigValidation(format!(
                "{} backup {} must not have a parent (got {})",
                self.backup_type, self.id, parent
            ))),
            (None, true) => Err(BackupError::ConfigValidation(format!(
                "{} backup {} requires a parent backup",
                self.backup_type, self.id
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(backup_type: BackupType, parent: Option<&str>) -> BackupMetadata {
        BackupMetadata {
            id: "b-1".to_string(),
            created_at: Utc::now(),
            completed_at: None,
            backup_type,
            status: BackupStatus::Pending,
            size_bytes: 0,
            checksum: String::new(),
            encrypted: false,
            compressed: false,
            source_resource: "database".to_string(),
            destination: StorageLocation::local("/tmp/b-1"),
            parent_backup_id: parent.map(str::to_string),
            retention_class: RetentionClass::Daily,
            tags: BTreeSet::new(),
        }
    }

    #[test]
    fn test_status_moves_forward_only() {
        let mut meta = sample(BackupType::Full, None);
        meta.transition(BackupStatus::Running).unwrap();
        meta.transition(BackupStatus::Completed).unwrap();
        assert!(meta.completed_at.is_some());

        assert!(meta.transition(BackupStatus::Running).is_err());
        assert!(meta.transition(BackupStatus::Failed).is_err());
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let mut meta = sample(BackupType::Full, None);
        assert!(meta.transition(BackupStatus::Completed).is_err());
        assert_eq!(meta.status, BackupStatus::Pending);
    }

    #[test]
    fn test_parent_shape() {
        assert!(sample(BackupType::Full, None).validate_shape().is_ok());
        assert!(sample(BackupType::Snapshot, Some("p")).validate_shape().is_err());
        assert!(sample(BackupType::Incremental, None).validate_shape().is_err());
        assert!(sample(BackupType::Differential, Some("p")).validate_shape().is_ok());
    }

    #[test]
    fn test_retention_class_parsing() {
        assert_eq!("Weekly".parse::<RetentionClass>().unwrap(), RetentionClass::Weekly);
        assert!("hourly".parse::<RetentionClass>().is_err());
    }

    #[test]
    fn test_metadata_serializes_snake_case() {
        let meta = sample(BackupType::Incremental, Some("b-0"));
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["backup_type"], "incremental");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["destination"]["kind"], "local");
    }
}
