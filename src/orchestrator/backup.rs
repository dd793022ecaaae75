// Create-backup lifecycle: validate, lock, export, transform, upload, catalog, replicate, notify

use bytes::Bytes;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::EngineContext;
use crate::adapters::{Alert, AlertSeverity, AlertType, Metric};
use crate::jobs::ProgressTracker;
use crate::metrics::Timer;
use crate::model::{
    BackupJob, BackupMetadata, BackupRequest, BackupStatus, BackupType, JobKind, JobStage,
};
use crate::replication::ArtifactRef;
use crate::transform::TransformPipeline;
use crate::{BackupError, Result};

/// Export, transform, upload, catalog, replicate
const BACKUP_STEPS: u64 = 5;

/// A backup that reached the catalog; only replication is left
struct Committed {
    metadata: BackupMetadata,
    artifact: Bytes,
    _worker: OwnedSemaphorePermit,
}

/// Drives `create_backup` calls
pub struct BackupOrchestrator {
    ctx: Arc<EngineContext>,
}

impl BackupOrchestrator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Create one backup.
    ///
    /// Backups of the same resource run one at a time. Everything up to the
    /// catalog registration runs under the backup deadline; a backup that
    /// misses it is cancelled and leaves no catalog entry. Replication failures
    /// mark the job degraded but never fail it.
    #[instrument(skip(self, request), fields(resource = %request.resource, backup_type = %request.backup_type))]
    pub async fn create_backup(&self, request: BackupRequest) -> Result<BackupJob> {
        let mut job = BackupJob::new(JobKind::Backup, BACKUP_STEPS);
        self.ctx.jobs.record(&job);

        let tracker = ProgressTracker::new(BACKUP_STEPS);
        let ticker = self.ctx.start_progress(&job.id, &tracker);
        let timer = Timer::start();
        self.ctx.metrics.record_job_start();

        let backup_timeout = self.ctx.config.backup_timeout;
        let deadline = Instant::now() + backup_timeout;

        let committed = match self.validate(&request) {
            Err(e) => Err(e),
            Ok(()) => {
                let run = self.commit(&request, &tracker, &mut job);
                match tokio::time::timeout_at(deadline, run).await {
                    Ok(result) => result,
                    Err(_) => Err(BackupError::Timeout {
                        operation: "backup".to_string(),
                        after: backup_timeout,
                    }),
                }
            }
        };

        let outcome = match committed {
            Ok(committed) => {
                self.replicate(&committed, &tracker, deadline, &mut job).await;
                job.backup = Some(committed.metadata);
                job.transition(BackupStatus::Completed)
            }
            Err(e) => Err(e),
        };

        job.progress = ticker.stop(outcome.is_ok());
        let duration = timer.elapsed_secs();
        match outcome {
            Ok(()) => {
                self.ctx
                    .metrics
                    .record_job_end("backup", job.status.as_str(), duration);
                self.notify_success(&job, duration);
                self.ctx.jobs.record(&job);
                Ok(job)
            }
            Err(e) => {
                job.fail(&e);
                self.ctx
                    .metrics
                    .record_job_end("backup", job.status.as_str(), duration);
                self.notify_failure(&job, &request, &e);
                self.ctx.jobs.record(&job);
                Err(e)
            }
        }
    }

    /// Static checks that need no I/O
    fn validate(&self, request: &BackupRequest) -> Result<()> {
        if request.resource.trim().is_empty() {
            return Err(BackupError::ConfigValidation(
                "backup resource must not be empty".to_string(),
            ));
        }
        if let (Some(parent), false) = (&request.last_backup_id, request.backup_type.requires_parent()) {
            return Err(BackupError::ConfigValidation(format!(
                "{} backups cannot name a parent (got {})",
                request.backup_type, parent
            )));
        }
        if request.encryption && self.ctx.config.encryption_key.is_none() {
            return Err(BackupError::ConfigValidation(
                "encryption requested but no key is configured".to_string(),
            ));
        }
        for pattern in request
            .include_patterns
            .iter()
            .chain(request.exclude_patterns.iter())
        {
            Regex::new(pattern).map_err(|e| {
                BackupError::ConfigValidation(format!("invalid pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }

    /// Lock, export, transform, upload and register
    async fn commit(
        &self,
        request: &BackupRequest,
        tracker: &ProgressTracker,
        job: &mut BackupJob,
    ) -> Result<Committed> {
        let _resource = self
            .ctx
            .resource_locks
            .acquire(&request.resource, self.ctx.config.lock_timeout)
            .await?;
        let worker = self.ctx.acquire_worker().await?;

        job.transition(BackupStatus::Running)?;
        self.ctx.jobs.record(job);
        let retry = self.ctx.retry(request.max_retries);

        let parent = self.resolve_base(request).await?;
        let mut metadata = BackupMetadata {
            id: format!("backup-{}", Uuid::new_v4()),
            created_at: chrono::Utc::now(),
            completed_at: None,
            backup_type: request.backup_type,
            status: BackupStatus::Pending,
            size_bytes: 0,
            checksum: String::new(),
            encrypted: request.encryption,
            compressed: request.compression,
            source_resource: request.resource.clone(),
            destination: request.destination.clone(),
            parent_backup_id: parent.as_ref().map(|p| p.id.clone()),
            retention_class: request.retention_class,
            tags: request.tags.clone(),
        };
        metadata.validate_shape()?;
        metadata.transition(BackupStatus::Running)?;
        info!(backup_id = %metadata.id, parent = ?metadata.parent_backup_id, "Backup started");

        tracker.set_stage(JobStage::Exporting);
        let raw = retry
            .execute("export", || self.export(request, parent.as_ref()))
            .await?;
        tracker.step(raw.len() as u64);
        debug!(backup_id = %metadata.id, raw_bytes = raw.len(), "Export finished");

        tracker.set_stage(JobStage::Transforming);
        let transform = self
            .ctx
            .write_transform(request.compression, request.encryption)?;
        let output = TransformPipeline::from_config(&transform).apply(&raw)?;
        drop(raw);
        tracker.step(output.artifact.len() as u64);
        debug!(
            backup_id = %metadata.id,
            artifact_bytes = output.artifact.len(),
            ratio = output.compression_ratio,
            "Artifact transformed"
        );

        tracker.set_stage(JobStage::Uploading);
        let destination = request.destination.child(&metadata.id);
        let receipt = retry
            .execute("upload", || async {
                self.ctx
                    .storage
                    .upload(output.artifact.clone(), &destination)
                    .await
                    .map_err(|e| BackupError::Upload(format!("{:#}", e)))
            })
            .await?;
        tracker.step(receipt.size);
        debug!(backup_id = %metadata.id, location = %receipt.location, storage_id = %receipt.id, "Artifact uploaded");

        tracker.set_stage(JobStage::Cataloging);
        metadata.size_bytes = output.artifact.len() as u64;
        metadata.checksum = output.checksum;
        metadata.destination = receipt.location;
        metadata.transition(BackupStatus::Completed)?;

        if let Err(e) = self.ctx.catalog.register(metadata.clone()).await {
            error!(backup_id = %metadata.id, error = %e, "Catalog registration failed, removing artifact");
            if let Err(cleanup) = self.ctx.storage.delete(&metadata.destination).await {
                warn!(backup_id = %metadata.id, error = %format!("{:#}", cleanup), "Failed to remove orphaned artifact");
            }
            return Err(e);
        }
        tracker.step(0);
        self.ctx.metrics.record_artifact_size(metadata.size_bytes);

        Ok(Committed {
            metadata,
            artifact: output.artifact,
            _worker: worker,
        })
    }

    /// Parent of an incremental or differential backup
    async fn resolve_base(&self, request: &BackupRequest) -> Result<Option<BackupMetadata>> {
        if !request.backup_type.requires_parent() {
            return Ok(None);
        }

        let base = match request.last_backup_id {
            Some(ref id) => self.ctx.catalog.get(id).await.map_err(|e| match e {
                BackupError::NotFound(_) => {
                    BackupError::ChainResolution(format!("base backup {} is not cataloged", id))
                }
                other => other,
            })?,
            None => {
                // Differentials always diff against the last full; incrementals chain
                let types: &[BackupType] = match request.backup_type {
                    BackupType::Differential => &[BackupType::Full],
                    _ => &[
                        BackupType::Full,
                        BackupType::Incremental,
                        BackupType::Differential,
                        BackupType::Snapshot,
                    ],
                };
                self.ctx
                    .catalog
                    .latest_completed(&request.resource, types)
                    .await?
                    .ok_or_else(|| {
                        BackupError::ChainResolution(format!(
                            "no completed base backup for {} backup of {}",
                            request.backup_type, request.resource
                        ))
                    })?
            }
        };

        if !base.is_completed() {
            return Err(BackupError::ChainResolution(format!(
                "base backup {} is {}, not completed",
                base.id, base.status
            )));
        }
        if base.source_resource != request.resource {
            return Err(BackupError::ChainResolution(format!(
                "base backup {} belongs to {}, not {}",
                base.id, base.source_resource, request.resource
            )));
        }
        if request.backup_type == BackupType::Differential && !base.backup_type.is_chain_root() {
            return Err(BackupError::ChainResolution(format!(
                "differential base {} is {}, expected a full or snapshot backup",
                base.id, base.backup_type
            )));
        }
        Ok(Some(base))
    }

    async fn export(&self, request: &BackupRequest, parent: Option<&BackupMetadata>) -> Result<Bytes> {
        let exported = match parent {
            None => {
                self.ctx
                    .data
                    .export(
                        &request.resource,
                        &request.include_patterns,
                        &request.exclude_patterns,
                    )
                    .await
            }
            Some(base) => {
                self.ctx
                    .data
                    .export_incremental(
                        &request.resource,
                        &base.id,
                        &request.include_patterns,
                        &request.exclude_patterns,
                    )
                    .await
            }
        };
        exported.map_err(|e| BackupError::Export(format!("{:#}", e)))
    }

    async fn replicate(
        &self,
        committed: &Committed,
        tracker: &ProgressTracker,
        deadline: Instant,
        job: &mut BackupJob,
    ) {
        let policy = &self.ctx.replication_policy;
        tracker.set_stage(JobStage::Replicating);
        if policy.is_empty() {
            tracker.step(0);
            return;
        }

        let artifact = ArtifactRef {
            backup_id: committed.metadata.id.clone(),
            bytes: committed.artifact.clone(),
            checksum: committed.metadata.checksum.clone(),
        };
        let replicate = self.ctx.replication.replicate(artifact, policy);
        match tokio::time::timeout_at(deadline, replicate).await {
            Ok(outcome) => {
                job.replication = outcome.results;
                job.degraded = outcome.degraded;
                if let Some(handle) = outcome.follow_up {
                    self.ctx.track_follow_up(handle);
                }
            }
            Err(_) => {
                warn!(backup_id = %committed.metadata.id, "Replication cut short by the backup deadline");
                job.degraded = true;
                self.ctx.events.alert(
                    Alert::new(
                        AlertType::ReplicationDegraded,
                        AlertSeverity::Warning,
                        "Backup replication degraded",
                        format!(
                            "Replication of backup {} did not finish before the deadline",
                            committed.metadata.id
                        ),
                    )
                    .with_metadata("backup_id", &committed.metadata.id),
                );
            }
        }
        tracker.step(committed.artifact.len() as u64);
    }

    fn notify_success(&self, job: &BackupJob, duration: f64) {
        let Some(ref meta) = job.backup else {
            return;
        };
        info!(
            backup_id = %meta.id,
            job_id = %job.id,
            size_bytes = meta.size_bytes,
            checksum = %meta.checksum,
            degraded = job.degraded,
            duration_secs = duration,
            "Backup completed"
        );

        let mut alert = Alert::new(
            AlertType::BackupCompleted,
            AlertSeverity::Info,
            "Backup completed",
            format!(
                "{} backup {} of {} completed ({} bytes)",
                meta.backup_type, meta.id, meta.source_resource, meta.size_bytes
            ),
        )
        .with_metadata("backup_id", &meta.id)
        .with_metadata("job_id", &job.id)
        .with_metadata("backup_type", meta.backup_type)
        .with_metadata("size_bytes", meta.size_bytes);
        if job.degraded {
            alert = alert.with_metadata("missed_replicas", job.missed_locations().join(","));
        }
        self.ctx.events.alert(alert);

        let tag = |m: Metric| {
            m.with_tag("resource", &meta.source_resource)
                .with_tag("backup_type", meta.backup_type)
        };
        self.ctx.events.metric(tag(Metric::new("backup.completed", 1.0)));
        self.ctx.events.metric(tag(Metric::new("backup.duration_seconds", duration)));
        self.ctx.events.metric(tag(Metric::new("backup.size_bytes", meta.size_bytes as f64)));
    }

    fn notify_failure(&self, job: &BackupJob, request: &BackupRequest, err: &BackupError) {
        error!(
            job_id = %job.id,
            resource = %request.resource,
            status = %job.status,
            error = %err,
            "Backup failed"
        );
        self.ctx.events.alert(
            Alert::new(
                AlertType::BackupFailed,
                AlertSeverity::Error,
                "Backup failed",
                format!(
                    "{} backup of {} failed: {}",
                    request.backup_type, request.resource, err
                ),
            )
            .with_metadata("job_id", &job.id)
            .with_metadata("resource", &request.resource)
            .with_metadata("error_kind", err.kind()),
        );
        self.ctx.events.metric(
            Metric::new("backup.failed", 1.0)
                .with_tag("resource", &request.resource)
                .with_tag("error_kind", err.kind()),
        );
    }
}
