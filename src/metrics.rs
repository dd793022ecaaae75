//! Prometheus metrics for backup and restore jobs
//!
//! Every engine owns its own registry, so several engines (or tests) can
//! coexist in one process without colliding on metric names.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::time::Instant;
use tracing::warn;

/// Job and artifact metrics
pub struct EngineMetrics {
    registry: Registry,
    jobs_total: IntCounterVec,
    job_duration: HistogramVec,
    artifact_bytes: Histogram,
    retries: IntCounterVec,
    replication_failures: IntCounterVec,
    checksum_mismatches: IntCounter,
    active_jobs: IntGauge,
}

impl EngineMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let jobs_total = IntCounterVec::new(
            Opts::new("backup_engine_jobs_total", "Total number of finished jobs"),
            &["kind", "status"],
        )?;
        let job_duration = HistogramVec::new(
            HistogramOpts::new(
                "backup_engine_job_duration_seconds",
                "Job duration in seconds",
            )
            .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0, 3600.0]),
            &["kind"],
        )?;
        let artifact_bytes = Histogram::with_opts(
            HistogramOpts::new(
                "backup_engine_artifact_bytes",
                "Size of uploaded artifacts in bytes",
            )
            .buckets(prometheus::exponential_buckets(1024.0, 4.0, 12)?),
        )?;
        let retries = IntCounterVec::new(
            Opts::new("backup_engine_retries_total", "Retried adapter calls"),
            &["operation"],
        )?;
        let replication_failures = IntCounterVec::new(
            Opts::new(
                "backup_engine_replication_failures_total",
                "Failed replica writes",
            ),
            &["target"],
        )?;
        let checksum_mismatches = IntCounter::new(
            "backup_engine_checksum_mismatches_total",
            "Artifacts that failed integrity verification",
        )?;
        let active_jobs = IntGauge::new("backup_engine_active_jobs", "Jobs currently running")?;

        registry.register(Box::new(jobs_total.clone()))?;
        registry.register(Box::new(job_duration.clone()))?;
        registry.register(Box::new(artifact_bytes.clone()))?;
        registry.register(Box::new(retries.clone()))?;
        registry.register(Box::new(replication_failures.clone()))?;
        registry.register(Box::new(checksum_mismatches.clone()))?;
        registry.register(Box::new(active_jobs.clone()))?;

        Ok(Self {
            registry,
            jobs_total,
            job_duration,
            artifact_bytes,
            retries,
            replication_failures,
            checksum_mismatches,
            active_jobs,
        })
    }

    pub fn record_job_start(&self) {
        self.active_jobs.inc();
    }

    pub fn record_job_end(&self, kind: &str, status: &str, duration_secs: f64) {
        self.active_jobs.dec();
        self.jobs_total.with_label_values(&[kind, status]).inc();
        self.job_duration
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    pub fn record_artifact_size(&self, bytes: u64) {
        self.artifact_bytes.observe(bytes as f64);
    }

    pub fn record_retry(&self, operation: &str) {
        self.retries.with_label_values(&[operation]).inc();
    }

    pub fn record_replication_failure(&self, target: &str) {
        self.replication_failures.with_label_values(&[target]).inc();
    }

    pub fn record_checksum_mismatch(&self) {
        self.checksum_mismatches.inc();
    }

    pub fn active_jobs(&self) -> i64 {
        self.active_jobs.get()
    }

    pub fn jobs_total(&self, kind: &str, status: &str) -> u64 {
        self.jobs_total.with_label_values(&[kind, status]).get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text format
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    #[inline]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    #[inline]
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_are_independent() {
        let first = EngineMetrics::new().unwrap();
        let second = EngineMetrics::new().unwrap();

        first.record_job_start();
        first.record_job_end("backup", "completed", 0.2);

        assert_eq!(first.jobs_total("backup", "completed"), 1);
        assert_eq!(second.jobs_total("backup", "completed"), 0);
        assert_eq!(first.active_jobs(), 0);
    }

    #[test]
    fn test_gather_text_exposes_metric_names() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record_checksum_mismatch();
        metrics.record_replication_failure("dr-site");
        metrics.record_artifact_size(4096);

        let text = metrics.gather_text();
        assert!(text.contains("backup_engine_checksum_mismatches_total 1"));
        assert!(text.contains("target=\"dr-site\""));
        assert!(text.contains("backup_engine_artifact_bytes_count 1"));
    }
}
