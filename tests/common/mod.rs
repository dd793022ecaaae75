//! In-memory adapters that record how the engine drives them

#![allow(dead_code)]

use async_trait::async_trait;
use backup_engine::adapters::{
    Alert, AlertSeverity, DataAdapter, ImportOutcome, Metric, MetricsAdapter, NotificationAdapter,
    StorageAdapter, UploadReceipt, ValidationReport,
};
use backup_engine::catalog::CatalogFilter;
use backup_engine::{BackupEngine, BackupMetadata, EngineConfig, RetryPolicy, StorageLocation};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Object store keyed by the location's display form
#[derive(Default)]
pub struct MockStorage {
    objects: Mutex<HashMap<String, Bytes>>,
    pub uploads: AtomicUsize,
    pub downloads: AtomicUsize,
    pub deletes: Mutex<Vec<String>>,
    /// Fail this many upload attempts before succeeding
    pub failing_uploads: AtomicU32,
    /// Forced answer for `verify_checksum`; `None` compares real content
    pub verify_override: Mutex<Option<bool>>,
    pub listing: Mutex<Vec<BackupMetadata>>,
}

impl MockStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn object(&self, location: &StorageLocation) -> Option<Bytes> {
        self.objects.lock().get(&location.to_string()).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// Flip one byte of a stored artifact
    pub fn corrupt(&self, location: &StorageLocation) {
        let mut objects = self.objects.lock();
        let key = location.to_string();
        let mut bytes = objects.get(&key).expect("artifact to corrupt").to_vec();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xFF;
        objects.insert(key, Bytes::from(bytes));
    }

    pub fn set_verify_result(&self, result: bool) {
        *self.verify_override.lock() = Some(result);
    }
}

#[async_trait]
impl StorageAdapter for MockStorage {
    async fn upload(&self, artifact: Bytes, destination: &StorageLocation) -> anyhow::Result<UploadReceipt> {
        if self
            .failing_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("connection reset by peer");
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let size = artifact.len() as u64;
        self.objects.lock().insert(destination.to_string(), artifact);
        Ok(UploadReceipt {
            id: "backup-123".to_string(),
            location: destination.clone(),
            size,
            checksum: "abc123".to_string(),
        })
    }

    async fn download(&self, location: &StorageLocation) -> anyhow::Result<Bytes> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.object(location)
            .ok_or_else(|| anyhow::anyhow!("no object at {}", location))
    }

    async fn list(&self, filter: &CatalogFilter) -> anyhow::Result<Vec<BackupMetadata>> {
        Ok(self
            .listing
            .lock()
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect())
    }

    async fn verify_checksum(&self, location: &StorageLocation, expected: &str) -> anyhow::Result<bool> {
        if let Some(forced) = *self.verify_override.lock() {
            return Ok(forced);
        }
        Ok(self
            .object(location)
            .map(|bytes| backup_engine::transform::checksum(&bytes) == expected)
            .unwrap_or(false))
    }

    async fn delete(&self, location: &StorageLocation) -> anyhow::Result<()> {
        self.objects.lock().remove(&location.to_string());
        self.deletes.lock().push(location.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ExportCall {
    pub resource: String,
    pub last_backup_id: Option<String>,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Debug, Clone)]
pub struct ImportCall {
    pub backup_id: String,
    pub data: Bytes,
    pub target: String,
    pub overwrite: bool,
}

/// Data source and target
pub struct MockData {
    pub payload: Mutex<Bytes>,
    pub export_delay: Mutex<Duration>,
    pub exports: Mutex<Vec<ExportCall>>,
    pub imports: Mutex<Vec<ImportCall>>,
    /// Records reported per imported artifact, keyed by its payload
    pub records_by_payload: Mutex<HashMap<Bytes, u64>>,
    pub estimated_records: AtomicU32,
    pub validations: AtomicUsize,
}

impl MockData {
    pub fn new(payload: &'static [u8]) -> Arc<Self> {
        Arc::new(Self {
            payload: Mutex::new(Bytes::from_static(payload)),
            export_delay: Mutex::new(Duration::ZERO),
            exports: Mutex::new(Vec::new()),
            imports: Mutex::new(Vec::new()),
            records_by_payload: Mutex::new(HashMap::new()),
            estimated_records: AtomicU32::new(0),
            validations: AtomicUsize::new(0),
        })
    }

    pub fn set_payload(&self, payload: &'static [u8]) {
        *self.payload.lock() = Bytes::from_static(payload);
    }

    pub fn set_records(&self, payload: &'static [u8], records: u64) {
        self.records_by_payload
            .lock()
            .insert(Bytes::from_static(payload), records);
    }

    async fn record_export(&self, resource: &str, last_backup_id: Option<&str>) -> Bytes {
        let started = Instant::now();
        let delay = *self.export_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.exports.lock().push(ExportCall {
            resource: resource.to_string(),
            last_backup_id: last_backup_id.map(str::to_string),
            started,
            finished: Instant::now(),
        });
        self.payload.lock().clone()
    }
}

#[async_trait]
impl DataAdapter for MockData {
    async fn export(&self, resource: &str, _include: &[String], _exclude: &[String]) -> anyhow::Result<Bytes> {
        Ok(self.record_export(resource, None).await)
    }

    async fn export_incremental(
        &self,
        resource: &str,
        last_backup_id: &str,
        _include: &[String],
        _exclude: &[String],
    ) -> anyhow::Result<Bytes> {
        Ok(self.record_export(resource, Some(last_backup_id)).await)
    }

    async fn import(
        &self,
        data: Bytes,
        target_location: &str,
        overwrite: bool,
        metadata: &BackupMetadata,
    ) -> anyhow::Result<ImportOutcome> {
        let records = self
            .records_by_payload
            .lock()
            .get(&data)
            .copied()
            .unwrap_or(data.len() as u64);
        self.imports.lock().push(ImportCall {
            backup_id: metadata.id.clone(),
            data,
            target: target_location.to_string(),
            overwrite,
        });
        Ok(ImportOutcome {
            records_imported: records,
        })
    }

    async fn validate_import(&self, _data: Bytes) -> anyhow::Result<ValidationReport> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        Ok(ValidationReport {
            valid: true,
            estimated_records: self.estimated_records.load(Ordering::SeqCst) as u64,
            warnings: Vec::new(),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: Mutex<Vec<Alert>>,
}

impl RecordingNotifier {
    pub fn with_severity(&self, severity: AlertSeverity) -> Vec<Alert> {
        self.alerts
            .lock()
            .iter()
            .filter(|a| a.severity == severity)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationAdapter for RecordingNotifier {
    async fn send_alert(&self, alert: Alert) -> anyhow::Result<()> {
        self.alerts.lock().push(alert);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMetrics {
    pub metrics: Mutex<Vec<Metric>>,
}

impl RecordingMetrics {
    pub fn names(&self) -> Vec<String> {
        self.metrics.lock().iter().map(|m| m.name.clone()).collect()
    }
}

#[async_trait]
impl MetricsAdapter for RecordingMetrics {
    async fn record_metric(&self, metric: Metric) -> anyhow::Result<()> {
        self.metrics.lock().push(metric);
        Ok(())
    }
}

/// Engine plus handles on every mock
pub struct Harness {
    pub engine: BackupEngine,
    pub storage: Arc<MockStorage>,
    pub data: Arc<MockData>,
    pub notifier: Arc<RecordingNotifier>,
    pub metrics: Arc<RecordingMetrics>,
}

/// Fast retries and short lock waits so failing paths finish quickly
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_concurrency(4)
        .with_lock_timeout(Duration::from_secs(5))
        .with_retry(RetryPolicy::new(
            3,
            Duration::from_millis(5),
            Duration::from_millis(20),
        ))
}

pub fn harness(config: EngineConfig) -> Harness {
    let storage = MockStorage::new();
    let data = MockData::new(b"test-data");
    let notifier = Arc::new(RecordingNotifier::default());
    let metrics = Arc::new(RecordingMetrics::default());
    let engine = BackupEngine::builder(storage.clone(), data.clone())
        .with_notifier(notifier.clone())
        .with_metrics_adapter(metrics.clone())
        .with_config(config)
        .build()
        .expect("engine builds");
    Harness {
        engine,
        storage,
        data,
        notifier,
        metrics,
    }
}

pub fn destination() -> StorageLocation {
    StorageLocation::s3("backups", "prod/database", "eu-west-1")
}
