// Restore lifecycle: resolve chain, download, verify, reverse, validate or import

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use super::EngineContext;
use crate::adapters::{Alert, AlertSeverity, AlertType, Metric};
use crate::jobs::ProgressTracker;
use crate::metrics::Timer;
use crate::model::{
    BackupJob, BackupMetadata, BackupStatus, JobKind, JobStage, RestoreRequest, RestoreResult,
    RestoreStatus,
};
use crate::transform::{self, TransformPipeline};
use crate::{BackupError, Result};

/// Drives `restore_backup` calls
pub struct RestoreOrchestrator {
    ctx: Arc<EngineContext>,
}

impl RestoreOrchestrator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Restore `backup_id` into `request.target_location`.
    ///
    /// Every chain member is downloaded, verified and decoded before the first
    /// import, so an integrity failure anywhere in the chain leaves the target
    /// untouched. Restores into the same target run one at a time.
    #[instrument(skip(self, request), fields(target = %request.target_location, dry_run = request.dry_run))]
    pub async fn restore_backup(&self, backup_id: &str, request: RestoreRequest) -> Result<RestoreResult> {
        let mut job = BackupJob::new(JobKind::Restore, 0);
        self.ctx.jobs.record(&job);

        let tracker = ProgressTracker::new(0);
        let ticker = self.ctx.start_progress(&job.id, &tracker);
        let timer = Timer::start();
        self.ctx.metrics.record_job_start();

        let restore_timeout = self.ctx.config.restore_timeout;
        let run = self.execute(backup_id, &request, &tracker, &mut job);
        let outcome = match tokio::time::timeout(restore_timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(BackupError::Timeout {
                operation: "restore".to_string(),
                after: restore_timeout,
            }),
        };
        let outcome = outcome.and_then(|result| {
            job.transition(BackupStatus::Completed)?;
            Ok(result)
        });

        job.progress = ticker.stop(outcome.is_ok());
        let duration = timer.elapsed_secs();
        match outcome {
            Ok(result) => {
                self.ctx
                    .metrics
                    .record_job_end("restore", job.status.as_str(), duration);
                self.notify_success(&job, &result, duration);
                self.ctx.jobs.record(&job);
                Ok(result)
            }
            Err(e) => {
                job.fail(&e);
                self.ctx
                    .metrics
                    .record_job_end("restore", job.status.as_str(), duration);
                self.notify_failure(&job, backup_id, &request, &e);
                self.ctx.jobs.record(&job);
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        backup_id: &str,
        request: &RestoreRequest,
        tracker: &ProgressTracker,
        job: &mut BackupJob,
    ) -> Result<RestoreResult> {
        let _target = self
            .ctx
            .target_locks
            .acquire(&request.target_location, self.ctx.config.lock_timeout)
            .await?;
        let _worker = self.ctx.acquire_worker().await?;
        job.transition(BackupStatus::Running)?;
        self.ctx.jobs.record(job);

        let target = self.ctx.catalog.get(backup_id).await?;
        job.backup = Some(target.clone());
        let chain = self.plan_chain(target, request).await?;
        let chain_ids: Vec<String> = chain.iter().map(|m| m.id.clone()).collect();
        info!(backup_id = backup_id, chain = ?chain_ids, "Restore chain resolved");

        let total = chain.len() as u64 * 2;
        tracker.set_total(total);
        job.progress.total = total;

        // Nothing touches the target until every member has been fetched and verified
        let mut decoded = Vec::with_capacity(chain.len());
        for member in &chain {
            let raw = self.fetch(member, request.verify_checksum, tracker).await?;
            decoded.push((member, raw));
        }

        let mut result = RestoreResult {
            job_id: job.id.clone(),
            status: RestoreStatus::Completed,
            restored_records: 0,
            estimated_records: 0,
            target_location: request.target_location.clone(),
            chain: chain_ids,
            warnings: Vec::new(),
        };

        if request.dry_run {
            tracker.set_stage(JobStage::Validating);
            for (member, raw) in decoded {
                let report = self
                    .ctx
                    .data
                    .validate_import(raw)
                    .await
                    .map_err(|e| BackupError::Import(format!("validating {}: {:#}", member.id, e)))?;
                if !report.valid {
                    return Err(BackupError::Import(format!(
                        "backup {} failed validation: {}",
                        member.id,
                        report.warnings.join("; ")
                    )));
                }
                debug!(backup_id = %member.id, estimated = report.estimated_records, "Chain member validated");
                result.estimated_records += report.estimated_records;
                result.warnings.extend(report.warnings);
                tracker.step(0);
            }
            result.status = RestoreStatus::DryRunSuccess;
        } else {
            tracker.set_stage(JobStage::Importing);
            for (member, raw) in decoded {
                let outcome = self
                    .ctx
                    .data
                    .import(raw, &request.target_location, request.overwrite, member)
                    .await
                    .map_err(|e| BackupError::Import(format!("importing {}: {:#}", member.id, e)))?;
                debug!(backup_id = %member.id, records = outcome.records_imported, "Chain member imported");
                result.restored_records += outcome.records_imported;
                tracker.step(0);
            }
        }

        Ok(result)
    }

    /// Which backups to apply, oldest first
    async fn plan_chain(
        &self,
        target: BackupMetadata,
        request: &RestoreRequest,
    ) -> Result<Vec<BackupMetadata>> {
        let standalone =
            request.incremental_only || (target.backup_type.is_chain_root() && !request.include_parent);
        if !standalone {
            return self.ctx.catalog.resolve_chain(&target.id).await;
        }
        if !target.is_completed() {
            return Err(BackupError::ChainResolution(format!(
                "backup {} is {}, not completed",
                target.id, target.status
            )));
        }
        Ok(vec![target])
    }

    /// Download one member, check its integrity and undo its transforms
    async fn fetch(
        &self,
        member: &BackupMetadata,
        verify_checksum: bool,
        tracker: &ProgressTracker,
    ) -> Result<Bytes> {
        tracker.set_stage(JobStage::Downloading);
        let artifact = self
            .ctx
            .retry(None)
            .execute("download", || async {
                self.ctx
                    .storage
                    .download(&member.destination)
                    .await
                    .map_err(|e| BackupError::Download(format!("{}: {:#}", member.id, e)))
            })
            .await?;

        if verify_checksum {
            tracker.set_stage(JobStage::Verifying);
            self.verify(member, &artifact).await?;
        }

        let transform = self.ctx.read_transform(member)?;
        let raw = TransformPipeline::from_config(&transform).reverse(&artifact)?;
        tracker.step(artifact.len() as u64);
        debug!(backup_id = %member.id, artifact_bytes = artifact.len(), raw_bytes = raw.len(), "Chain member decoded");
        Ok(raw)
    }

    /// Both the storage backend and a local recomputation must agree with the catalog
    async fn verify(&self, member: &BackupMetadata, artifact: &[u8]) -> Result<()> {
        let stored_ok = self
            .ctx
            .storage
            .verify_checksum(&member.destination, &member.checksum)
            .await
            .map_err(|e| BackupError::Download(format!("verifying {}: {:#}", member.id, e)))?;
        let actual = transform::checksum(artifact);

        if stored_ok && actual == member.checksum {
            return Ok(());
        }

        self.ctx.metrics.record_checksum_mismatch();
        Err(BackupError::ChecksumMismatch {
            backup_id: member.id.clone(),
            expected: member.checksum.clone(),
            actual: if actual != member.checksum {
                actual
            } else {
                "rejected by storage backend".to_string()
            },
        })
    }

    fn notify_success(&self, job: &BackupJob, result: &RestoreResult, duration: f64) {
        info!(
            job_id = %job.id,
            status = ?result.status,
            restored_records = result.restored_records,
            estimated_records = result.estimated_records,
            chain_len = result.chain.len(),
            duration_secs = duration,
            "Restore finished"
        );

        let backup_id = result.chain.last().cloned().unwrap_or_default();
        let message = match result.status {
            RestoreStatus::Completed => format!(
                "Restored {} records from {} into {}",
                result.restored_records, backup_id, result.target_location
            ),
            RestoreStatus::DryRunSuccess => format!(
                "Dry run of {} into {} would restore about {} records",
                backup_id, result.target_location, result.estimated_records
            ),
        };
        self.ctx.events.alert(
            Alert::new(
                AlertType::RestoreCompleted,
                AlertSeverity::Info,
                "Restore completed",
                message,
            )
            .with_metadata("backup_id", &backup_id)
            .with_metadata("job_id", &job.id)
            .with_metadata("dry_run", result.status == RestoreStatus::DryRunSuccess),
        );
        self.ctx.events.metric(
            Metric::new("restore.duration_seconds", duration)
                .with_tag("target", &result.target_location),
        );
        self.ctx.events.metric(
            Metric::new("restore.records", result.restored_records as f64)
                .with_tag("target", &result.target_location),
        );
    }

    /// Exactly one alert per failed restore; integrity failures get the critical one
    fn notify_failure(&self, job: &BackupJob, backup_id: &str, request: &RestoreRequest, err: &BackupError) {
        error!(
            job_id = %job.id,
            backup_id = backup_id,
            target = %request.target_location,
            status = %job.status,
            error = %err,
            "Restore failed"
        );

        let alert = match err {
            BackupError::ChecksumMismatch {
                backup_id: corrupted,
                expected,
                actual,
            } => Alert::new(
                AlertType::ChecksumMismatch,
                AlertSeverity::Critical,
                "Backup integrity check failed",
                format!(
                    "Restore of {} aborted before touching {}: {}",
                    backup_id, request.target_location, err
                ),
            )
            .with_metadata("corrupted_backup_id", corrupted)
            .with_metadata("expected", expected)
            .with_metadata("actual", actual),
            _ => Alert::new(
                AlertType::RestoreFailed,
                AlertSeverity::Error,
                "Restore failed",
                format!(
                    "Restore of {} into {} failed: {}",
                    backup_id, request.target_location, err
                ),
            ),
        }
        .with_metadata("backup_id", backup_id)
        .with_metadata("job_id", &job.id)
        .with_metadata("error_kind", err.kind());

        self.ctx.events.alert(alert);
        self.ctx.events.metric(
            Metric::new("restore.failed", 1.0)
                .with_tag("target", &request.target_location)
                .with_tag("error_kind", err.kind()),
        );
    }
}
