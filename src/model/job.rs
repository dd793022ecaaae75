// Job state - transient execution record for one backup or restore call

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::metadata::{BackupMetadata, BackupStatus};
use crate::replication::ReplicationResult;
use crate::{BackupError, Result};

/// What a job does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Backup,
    Restore,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Backup => "backup",
            JobKind::Restore => "restore",
        }
    }
}

/// Step a job is currently executing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    Exporting,
    Transforming,
    Uploading,
    Cataloging,
    Replicating,
    Downloading,
    Verifying,
    Importing,
    Validating,
    Finished,
}

/// Progress snapshot reported while a job runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub current: u64,
    pub total: u64,
    pub percentage: f64,
    /// Bytes per second processed so far
    pub throughput: f64,
    pub eta: Option<Duration>,
    pub stage: JobStage,
    pub bytes_processed: u64,
}

impl JobProgress {
    pub fn new(total: u64) -> Self {
        Self {
            current: 0,
            total,
            percentage: 0.0,
            throughput: 0.0,
            eta: None,
            stage: JobStage::Queued,
            bytes_processed: 0,
        }
    }

    /// Recompute derived fields from `current`, `total` and elapsed time
    pub fn refresh(&mut self, elapsed: Duration) {
        self.current = self.current.min(self.total);
        self.percentage = if self.total == 0 {
            0.0
        } else {
            self.current as f64 / self.total as f64 * 100.0
        };

        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.throughput = self.bytes_processed as f64 / secs;
        }

        self.eta = if self.current == 0 || self.current >= self.total {
            None
        } else {
            let per_step = secs / self.current as f64;
            Some(Duration::from_secs_f64(
                per_step * (self.total - self.current) as f64,
            ))
        };
    }
}

/// Execution record for one backup or restore call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: String,
    pub kind: JobKind,
    pub status: BackupStatus,
    pub progress: JobProgress,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// First fatal error, if the job did not complete
    pub error: Option<String>,
    /// Metadata of the backup produced (backup jobs) or restored (restore jobs)
    pub backup: Option<BackupMetadata>,
    /// Results of blocking replication; empty for async policies
    pub replication: Vec<ReplicationResult>,
    /// Completed at the primary location but missed at least one replica
    pub degraded: bool,
}

impl BackupJob {
    pub fn new(kind: JobKind, total_steps: u64) -> Self {
        Self {
            id: format!("job-{}", Uuid::new_v4()),
            kind,
            status: BackupStatus::Pending,
            progress: JobProgress::new(total_steps),
            start_time: Utc::now(),
            end_time: None,
            error: None,
            backup: None,
            replication: Vec::new(),
            degraded: false,
        }
    }

    pub fn transition(&mut self, next: BackupStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(BackupError::ConfigValidation(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
            self.progress.stage = JobStage::Finished;
        }
        Ok(())
    }

    /// Terminate the job with the error that ended it
    pub fn fail(&mut self, error: &BackupError) {
        let next = if error.is_timeout() {
            BackupStatus::Cancelled
        } else {
            BackupStatus::Failed
        };
        if self.transition(next).is_ok() {
            self.error = Some(error.to_string());
        }
    }

    pub fn missed_locations(&self) -> Vec<String> {
        self.replication
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.target.clone())
            .collect()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.end_time
            .and_then(|end| (end - self.start_time).to_std().ok())
    }
}
