//! Replica fan-out for finished artifacts.
//!
//! Replication never decides whether a backup succeeded. A replica that could
//! not be written is recorded in its [`ReplicationResult`] and the job is marked
//! degraded; the primary copy and its catalog entry are untouched.

use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{Alert, AlertSeverity, AlertType, Metric, StorageAdapter};
use crate::events::EventSender;
use crate::metrics::EngineMetrics;
use crate::model::StorageLocation;
use crate::{BackupError, Result};

/// When replicas are written relative to the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// Secondary replicas are written before the job completes
    Sync,
    /// Every replica is written by a follow-up task
    Async,
    /// Like `Async`, after an initial delay
    Lazy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaTier {
    Secondary,
    Tertiary,
}

/// One place a replica is written to
#[derive(Clone)]
pub struct ReplicaTarget {
    pub name: String,
    pub tier: ReplicaTier,
    /// Prefix the artifact is written under
    pub destination: StorageLocation,
    pub storage: Arc<dyn StorageAdapter>,
}

impl ReplicaTarget {
    pub fn new(
        name: impl Into<String>,
        tier: ReplicaTier,
        destination: StorageLocation,
        storage: Arc<dyn StorageAdapter>,
    ) -> Self {
        Self {
            name: name.into(),
            tier,
            destination,
            storage,
        }
    }
}

impl fmt::Debug for ReplicaTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaTarget")
            .field("name", &self.name)
            .field("tier", &self.tier)
            .field("destination", &self.destination)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ReplicationPolicy {
    pub mode: ReplicationMode,
    /// Secondary replicas that must succeed for the job not to be degraded
    pub min_replicas: usize,
    pub targets: Vec<ReplicaTarget>,
    pub lazy_delay: Duration,
}

impl ReplicationPolicy {
    pub fn new(mode: ReplicationMode) -> Self {
        Self {
            mode,
            min_replicas: 0,
            targets: Vec::new(),
            lazy_delay: Duration::from_secs(60),
        }
    }

    /// No replica targets
    pub fn disabled() -> Self {
        Self::new(ReplicationMode::Async)
    }

    pub fn with_target(mut self, target: ReplicaTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_min_replicas(mut self, count: usize) -> Self {
        self.min_replicas = count;
        self
    }

    pub fn with_lazy_delay(mut self, delay: Duration) -> Self {
        self.lazy_delay = delay;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn tier(&self, tier: ReplicaTier) -> Vec<ReplicaTarget> {
        self.targets
            .iter()
            .filter(|t| t.tier == tier)
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.mode != ReplicationMode::Sync {
            return Ok(());
        }
        let secondaries = self
            .targets
            .iter()
            .filter(|t| t.tier == ReplicaTier::Secondary)
            .count();
        if self.min_replicas > secondaries {
            return Err(BackupError::ConfigValidation(format!(
                "min_replicas is {} but only {} secondary targets are configured",
                self.min_replicas, secondaries
            )));
        }
        Ok(())
    }
}

/// The artifact being replicated
#[derive(Debug, Clone)]
pub struct ArtifactRef {
    pub backup_id: String,
    pub bytes: Bytes,
    pub checksum: String,
}

impl ArtifactRef {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ReplicaStatus {
    Replicated,
    Failed(String),
}

/// Outcome for one replica target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationResult {
    pub target: String,
    pub tier: ReplicaTier,
    pub location: StorageLocation,
    pub status: ReplicaStatus,
}

impl ReplicationResult {
    pub fn is_success(&self) -> bool {
        self.status == ReplicaStatus::Replicated
    }

    /// The failure as an error value, for callers that want to surface it
    pub fn error(&self) -> Option<BackupError> {
        match self.status {
            ReplicaStatus::Replicated => None,
            ReplicaStatus::Failed(ref reason) => Some(BackupError::Replication {
                location: self.location.to_string(),
                reason: reason.clone(),
            }),
        }
    }
}

/// What `replicate` hands back to the job
#[derive(Debug)]
pub struct ReplicationOutcome {
    /// Results the job waited for (sync secondary tier)
    pub results: Vec<ReplicationResult>,
    /// Replicas still being written in the background
    pub follow_up: Option<JoinHandle<Vec<ReplicationResult>>>,
    pub degraded: bool,
}

impl ReplicationOutcome {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            follow_up: None,
            degraded: false,
        }
    }
}

/// Writes replicas according to a [`ReplicationPolicy`]
#[derive(Clone)]
pub struct ReplicationCoordinator {
    events: EventSender,
    metrics: Arc<EngineMetrics>,
}

impl ReplicationCoordinator {
    pub fn new(events: EventSender, metrics: Arc<EngineMetrics>) -> Self {
        Self { events, metrics }
    }

    /// Replicate `artifact`. Must be called from within a Tokio runtime.
    #[instrument(skip(self, artifact, policy), fields(backup_id = %artifact.backup_id, mode = ?policy.mode))]
    pub async fn replicate(&self, artifact: ArtifactRef, policy: &ReplicationPolicy) -> ReplicationOutcome {
        if policy.is_empty() {
            return ReplicationOutcome::empty();
        }

        match policy.mode {
            ReplicationMode::Sync => {
                let secondaries = policy.tier(ReplicaTier::Secondary);
                let results = self.write_all(&artifact, &secondaries).await;
                let succeeded = results.iter().filter(|r| r.is_success()).count();
                let degraded = succeeded < policy.min_replicas || succeeded < results.len();
                if degraded {
                    self.alert_degraded(&artifact.backup_id, &results);
                }
                info!(
                    succeeded = succeeded,
                    attempted = results.len(),
                    degraded = degraded,
                    "Synchronous replication finished"
                );

                let tertiaries = policy.tier(ReplicaTier::Tertiary);
                let follow_up = if tertiaries.is_empty() {
                    None
                } else {
                    Some(self.spawn_follow_up(artifact, tertiaries, Duration::ZERO))
                };
                ReplicationOutcome {
                    results,
                    follow_up,
                    degraded,
                }
            }
            ReplicationMode::Async | ReplicationMode::Lazy => {
                let delay = if policy.mode == ReplicationMode::Lazy {
                    policy.lazy_delay
                } else {
                    Duration::ZERO
                };
                debug!(targets = policy.targets.len(), delay_ms = delay.as_millis() as u64, "Scheduling background replication");
                ReplicationOutcome {
                    results: Vec::new(),
                    follow_up: Some(self.spawn_follow_up(artifact, policy.targets.clone(), delay)),
                    degraded: false,
                }
            }
        }
    }

    fn spawn_follow_up(
        &self,
        artifact: ArtifactRef,
        targets: Vec<ReplicaTarget>,
        delay: Duration,
    ) -> JoinHandle<Vec<ReplicationResult>> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let results = coordinator.write_all(&artifact, &targets).await;
            if results.iter().any(|r| !r.is_success()) {
                coordinator.alert_degraded(&artifact.backup_id, &results);
            }
            results
        })
    }

    async fn write_all(&self, artifact: &ArtifactRef, targets: &[ReplicaTarget]) -> Vec<ReplicationResult> {
        join_all(targets.iter().map(|target| self.write_one(artifact, target))).await
    }

    async fn write_one(&self, artifact: &ArtifactRef, target: &ReplicaTarget) -> ReplicationResult {
        let location = target.destination.child(&artifact.backup_id);
        let status = match push_replica(artifact, target, &location).await {
            Ok(()) => {
                debug!(target = %target.name, location = %location, "Replica written");
                ReplicaStatus::Replicated
            }
            Err(reason) => {
                warn!(target = %target.name, location = %location, reason = %reason, "Replica write failed");
                self.metrics.record_replication_failure(&target.name);
                self.events.metric(
                    Metric::new("backup.replication.failed", 1.0).with_tag("target", &target.name),
                );
                ReplicaStatus::Failed(reason)
            }
        };
        ReplicationResult {
            target: target.name.clone(),
            tier: target.tier,
            location,
            status,
        }
    }

    fn alert_degraded(&self, backup_id: &str, results: &[ReplicationResult]) {
        let missed: Vec<&str> = results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.target.as_str())
            .collect();
        self.events.alert(
            Alert::new(
                AlertType::ReplicationDegraded,
                AlertSeverity::Warning,
                "Backup replication degraded",
                format!(
                    "Backup {} is missing replicas at: {}",
                    backup_id,
                    missed.join(", ")
                ),
            )
            .with_metadata("backup_id", backup_id)
            .with_metadata("missed", missed.join(",")),
        );
    }
}

async fn push_replica(
    artifact: &ArtifactRef,
    target: &ReplicaTarget,
    location: &StorageLocation,
) -> std::result::Result<(), String> {
    let receipt = target
        .storage
        .upload(artifact.bytes.clone(), location)
        .await
        .map_err(|e| format!("upload failed: {:#}", e))?;

    let verified = target
        .storage
        .verify_checksum(&receipt.location, &artifact.checksum)
        .await
        .map_err(|e| format!("checksum verification failed: {:#}", e))?;
    if !verified {
        return Err(format!("replica checksum does not match {}", artifact.checksum));
    }
    Ok(())
}
