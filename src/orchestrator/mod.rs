//! Backup and restore orchestration.
//!
//! [`BackupEngine`] is the composition root: it owns the catalog, the adapters,
//! the worker pool, the keyed locks and the event dispatcher, and hands a
//! shared [`EngineContext`] to the two orchestrators.

mod backup;
mod restore;

pub use backup::BackupOrchestrator;
pub use restore::RestoreOrchestrator;

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::adapters::{
    Alert, AlertSeverity, AlertType, DataAdapter, MetricsAdapter, NoopMetrics, NoopNotifier,
    NotificationAdapter, StorageAdapter,
};
use crate::catalog::BackupCatalog;
use crate::config::EngineConfig;
use crate::events::{self, EventSender};
use crate::jobs::{JobRegistry, KeyedLocks, ProgressCallback, ProgressTicker, ProgressTracker, RetryExecutor};
use crate::metrics::EngineMetrics;
use crate::model::{BackupJob, BackupMetadata, BackupRequest, JobKind, RestoreRequest, RestoreResult};
use crate::replication::{ReplicationCoordinator, ReplicationPolicy, ReplicationResult};
use crate::retention::{CleanupResult, RetentionManager, RetentionPlan, RetentionPolicy};
use crate::transform::TransformConfig;
use crate::{BackupError, Result};

/// Everything both orchestrators need, shared behind one `Arc`
pub struct EngineContext {
    pub catalog: BackupCatalog,
    pub storage: Arc<dyn StorageAdapter>,
    pub data: Arc<dyn DataAdapter>,
    pub events: EventSender,
    pub metrics: Arc<EngineMetrics>,
    pub config: EngineConfig,
    pub replication: ReplicationCoordinator,
    pub replication_policy: ReplicationPolicy,
    pub jobs: JobRegistry,
    workers: Arc<Semaphore>,
    resource_locks: KeyedLocks,
    target_locks: KeyedLocks,
    progress_callback: Option<ProgressCallback>,
    follow_ups: Mutex<Vec<JoinHandle<Vec<ReplicationResult>>>>,
}

impl EngineContext {
    async fn acquire_worker(&self) -> Result<OwnedSemaphorePermit> {
        self.workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BackupError::ConfigValidation("engine is shut down".to_string()))
    }

    fn retry(&self, max_retries: Option<u32>) -> RetryExecutor {
        let policy = match max_retries {
            Some(retries) => self.config.retry.with_max_retries(retries),
            None => self.config.retry,
        };
        RetryExecutor::new(policy).with_metrics(self.metrics.clone())
    }

    fn start_progress(&self, job_id: &str, tracker: &ProgressTracker) -> ProgressTicker {
        ProgressTicker::start(
            job_id,
            tracker.clone(),
            self.config.progress_interval,
            self.progress_callback.clone(),
        )
    }

    /// Pipeline settings for writing a new artifact
    fn write_transform(&self, compress: bool, encrypt: bool) -> Result<TransformConfig> {
        let mut transform = TransformConfig::new();
        if compress {
            transform = transform.with_compression(self.config.compression_level);
        }
        if encrypt {
            transform = transform.with_encryption(self.encryption_key()?);
        }
        Ok(transform)
    }

    /// Pipeline settings that undo the transforms recorded on `meta`
    fn read_transform(&self, meta: &BackupMetadata) -> Result<TransformConfig> {
        self.write_transform(meta.compressed, meta.encrypted)
    }

    fn encryption_key(&self) -> Result<crate::transform::EncryptionKey> {
        self.config.encryption_key.clone().ok_or_else(|| {
            BackupError::ConfigValidation("encryption requested but no key is configured".to_string())
        })
    }

    fn track_follow_up(&self, handle: JoinHandle<Vec<ReplicationResult>>) {
        let mut follow_ups = self.follow_ups.lock();
        follow_ups.retain(|h| !h.is_finished());
        follow_ups.push(handle);
    }

    fn release_idle_locks(&self) {
        self.resource_locks.prune_idle();
        self.target_locks.prune_idle();
    }
}

/// Assembles a [`BackupEngine`]
pub struct BackupEngineBuilder {
    storage: Arc<dyn StorageAdapter>,
    data: Arc<dyn DataAdapter>,
    notifier: Arc<dyn NotificationAdapter>,
    metrics: Arc<dyn MetricsAdapter>,
    catalog: Option<BackupCatalog>,
    config: EngineConfig,
    replication_policy: Option<ReplicationPolicy>,
    progress_callback: Option<ProgressCallback>,
}

impl BackupEngineBuilder {
    pub fn new(storage: Arc<dyn StorageAdapter>, data: Arc<dyn DataAdapter>) -> Self {
        Self {
            storage,
            data,
            notifier: Arc::new(NoopNotifier),
            metrics: Arc::new(NoopMetrics),
            catalog: None,
            config: EngineConfig::default(),
            replication_policy: None,
            progress_callback: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationAdapter>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_metrics_adapter(mut self, metrics: Arc<dyn MetricsAdapter>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Defaults to an in-memory catalog
    pub fn with_catalog(mut self, catalog: BackupCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_replication(mut self, policy: ReplicationPolicy) -> Self {
        self.replication_policy = Some(policy);
        self
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &crate::model::JobProgress) + Send + Sync + 'static,
    {
        let callback: ProgressCallback = Arc::new(callback);
        self.progress_callback = Some(callback);
        self
    }

    /// Validate the configuration and start the event dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<BackupEngine> {
        self.config.validate()?;
        let replication_policy = self
            .replication_policy
            .unwrap_or_else(ReplicationPolicy::disabled);
        replication_policy.validate()?;

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BackupError::ConfigValidation(
                "BackupEngine must be built inside a Tokio runtime".to_string(),
            ));
        }

        let metrics = Arc::new(
            EngineMetrics::new()
                .map_err(|e| BackupError::ConfigValidation(format!("metrics registry: {}", e)))?,
        );
        let (events, dispatcher) = events::channel(self.notifier, self.metrics);
        let dispatcher = dispatcher.spawn();

        let ctx = Arc::new(EngineContext {
            catalog: self.catalog.unwrap_or_else(BackupCatalog::in_memory),
            storage: self.storage,
            data: self.data,
            replication: ReplicationCoordinator::new(events.clone(), metrics.clone()),
            events,
            metrics,
            workers: Arc::new(Semaphore::new(self.config.concurrency)),
            config: self.config,
            replication_policy,
            jobs: JobRegistry::new(),
            resource_locks: KeyedLocks::new("resource"),
            target_locks: KeyedLocks::new("target"),
            progress_callback: self.progress_callback,
            follow_ups: Mutex::new(Vec::new()),
        });

        info!(
            concurrency = ctx.config.concurrency,
            encryption = ctx.config.encryption_key.is_some(),
            replicas = ctx.replication_policy.targets.len(),
            "Backup engine started"
        );

        Ok(BackupEngine {
            backups: BackupOrchestrator::new(ctx.clone()),
            restores: RestoreOrchestrator::new(ctx.clone()),
            retention: RetentionManager::new(),
            ctx,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }
}

/// The engine: one instance per protected data store
pub struct BackupEngine {
    ctx: Arc<EngineContext>,
    backups: BackupOrchestrator,
    restores: RestoreOrchestrator,
    retention: RetentionManager,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl BackupEngine {
    pub fn builder(storage: Arc<dyn StorageAdapter>, data: Arc<dyn DataAdapter>) -> BackupEngineBuilder {
        BackupEngineBuilder::new(storage, data)
    }

    /// Run a backup to completion; see [`BackupOrchestrator::create_backup`]
    pub async fn create_backup(&self, request: BackupRequest) -> Result<BackupJob> {
        let result = self.backups.create_backup(request).await;
        self.ctx.release_idle_locks();
        result
    }

    /// Restore a backup (and its chain); see [`RestoreOrchestrator::restore_backup`]
    pub async fn restore_backup(&self, backup_id: &str, request: RestoreRequest) -> Result<RestoreResult> {
        let result = self.restores.restore_backup(backup_id, request).await;
        self.ctx.release_idle_locks();
        result
    }

    pub fn catalog(&self) -> &BackupCatalog {
        &self.ctx.catalog
    }

    pub async fn plan_retention(&self, policy: &RetentionPolicy) -> Result<RetentionPlan> {
        self.retention.plan(&self.ctx.catalog, policy).await
    }

    /// Delete what `policy` no longer keeps
    #[instrument(skip(self, policy))]
    pub async fn enforce_retention(&self, policy: &RetentionPolicy) -> Result<CleanupResult> {
        let result = self
            .retention
            .enforce(&self.ctx.catalog, self.ctx.storage.as_ref(), policy)
            .await?;

        if !result.failed.is_empty() {
            let failed: Vec<&str> = result.failed.iter().map(|(id, _)| id.as_str()).collect();
            self.ctx.events.alert(
                Alert::new(
                    AlertType::RetentionFailed,
                    AlertSeverity::Warning,
                    "Retention cleanup incomplete",
                    format!("Could not delete {} backups: {}", failed.len(), failed.join(", ")),
                )
                .with_metadata("failed", failed.join(",")),
            );
        }
        self.ctx.events.metric(
            crate::adapters::Metric::new("retention.deleted", result.deleted.len() as f64),
        );
        Ok(result)
    }

    /// Re-register artifacts the storage backend still holds
    pub async fn rebuild_catalog(&self) -> Result<usize> {
        self.ctx
            .catalog
            .rebuild_from_storage(self.ctx.storage.as_ref())
            .await
    }

    pub fn job(&self, id: &str) -> Option<BackupJob> {
        self.ctx.jobs.get(id)
    }

    pub fn jobs(&self, kind: Option<JobKind>) -> Vec<BackupJob> {
        self.ctx.jobs.list(kind)
    }

    /// Prometheus text exposition of the engine's own metrics
    pub fn metrics_text(&self) -> String {
        self.ctx.metrics.gather_text()
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.ctx.metrics
    }

    /// Wait until every alert and metric emitted so far has been delivered
    pub async fn flush_events(&self) {
        self.ctx.events.flush().await;
    }

    /// Wait for background replication and drain outbound events.
    ///
    /// The engine stops accepting jobs; calls made afterwards fail.
    pub async fn shutdown(&self) {
        self.ctx.workers.close();

        let pending: Vec<_> = self.ctx.follow_ups.lock().drain(..).collect();
        for handle in pending {
            match handle.await {
                Ok(results) => {
                    let failed = results.iter().filter(|r| !r.is_success()).count();
                    if failed > 0 {
                        warn!(failed = failed, "Background replication finished with failures");
                    }
                }
                Err(e) => warn!(error = %e, "Background replication task aborted"),
            }
        }

        self.ctx.events.flush().await;
        if let Some(handle) = self.dispatcher.lock().take() {
            // The dispatcher runs until every sender is gone; it is idle after the flush
            handle.abort();
        }
        info!("Backup engine stopped");
    }
}
