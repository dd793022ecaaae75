use dashmap::DashMap;
use std::sync::Arc;

use crate::model::{BackupJob, JobKind};

/// In-memory archive of jobs, running and finished
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<String, BackupJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `job.id`
    pub fn record(&self, job: &BackupJob) {
        self.jobs.insert(job.id.clone(), job.clone());
    }

    pub fn get(&self, id: &str) -> Option<BackupJob> {
        self.jobs.get(id).map(|entry| entry.value().clone())
    }

    /// Every job of `kind` (or all jobs), oldest first
    pub fn list(&self, kind: Option<JobKind>) -> Vec<BackupJob> {
        let mut jobs: Vec<BackupJob> = self
            .jobs
            .iter()
            .filter(|entry| kind.map_or(true, |k| entry.kind == k))
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        jobs
    }

    pub fn active(&self) -> usize {
        self.jobs
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .count()
    }
}
