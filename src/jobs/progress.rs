// Progress tracking and the periodic reporting task

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::model::{JobProgress, JobStage};

/// Receives `(job id, progress snapshot)`; must not block
pub type ProgressCallback = Arc<dyn Fn(&str, &JobProgress) + Send + Sync>;

/// Shared, cheaply cloneable progress state for one job
#[derive(Clone)]
pub struct ProgressTracker {
    progress: Arc<Mutex<JobProgress>>,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total_steps: u64) -> Self {
        Self {
            progress: Arc::new(Mutex::new(JobProgress::new(total_steps))),
            started: Instant::now(),
        }
    }

    pub fn set_total(&self, total_steps: u64) {
        self.progress.lock().total = total_steps;
    }

    pub fn set_stage(&self, stage: JobStage) {
        self.progress.lock().stage = stage;
    }

    /// Mark one step done, having processed `bytes`
    pub fn step(&self, bytes: u64) {
        let mut progress = self.progress.lock();
        progress.current += 1;
        progress.bytes_processed += bytes;
    }

    pub fn finish(&self) {
        let mut progress = self.progress.lock();
        progress.current = progress.total;
        progress.stage = JobStage::Finished;
    }

    pub fn snapshot(&self) -> JobProgress {
        let mut progress = self.progress.lock().clone();
        progress.refresh(self.started.elapsed());
        progress
    }
}

/// Background task invoking a callback every interval
pub struct ProgressTicker {
    handle: Option<JoinHandle<()>>,
    job_id: String,
    tracker: ProgressTracker,
    callback: Option<ProgressCallback>,
}

impl ProgressTicker {
    /// Start reporting; without a callback nothing is spawned
    pub fn start(
        job_id: impl Into<String>,
        tracker: ProgressTracker,
        interval: Duration,
        callback: Option<ProgressCallback>,
    ) -> Self {
        let job_id = job_id.into();
        let handle = callback.clone().map(|callback| {
            let job_id = job_id.clone();
            let tracker = tracker.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // The first tick completes immediately
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    callback(&job_id, &tracker.snapshot());
                }
            })
        });
        Self {
            handle,
            job_id,
            tracker,
            callback,
        }
    }

    /// Stop ticking and deliver the terminal snapshot.
    ///
    /// Only a successful job is driven to completion; a failed one reports
    /// the step it reached.
    pub fn stop(mut self, success: bool) -> JobProgress {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        if success {
            self.tracker.finish();
        }
        let last = self.tracker.snapshot();
        if let Some(ref callback) = self.callback {
            callback(&self.job_id, &last);
        }
        last
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (ProgressCallback, Arc<Mutex<Vec<JobProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |_job: &str, progress: &JobProgress| {
            sink.lock().push(progress.clone());
        });
        (callback, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_interval_and_reports_final_state() {
        let (callback, seen) = recording();
        let tracker = ProgressTracker::new(4);
        let ticker = ProgressTicker::start("job-1", tracker.clone(), Duration::from_millis(100), Some(callback));

        tracker.set_stage(JobStage::Exporting);
        tracker.step(512);
        tokio::time::sleep(Duration::from_millis(350)).await;
        let ticks = seen.lock().len();
        assert_eq!(ticks, 3);
        assert_eq!(seen.lock()[0].stage, JobStage::Exporting);

        let last = ticker.stop(true);
        assert_eq!(last.percentage, 100.0);
        assert_eq!(seen.lock().len(), ticks + 1);
        assert_eq!(seen.lock().last().unwrap().stage, JobStage::Finished);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(seen.lock().len(), ticks + 1);
    }

    #[tokio::test]
    async fn test_without_callback_nothing_runs() {
        let tracker = ProgressTracker::new(2);
        let ticker = ProgressTicker::start("job-2", tracker.clone(), Duration::from_millis(1), None);
        tracker.step(10);
        assert_eq!(tracker.snapshot().percentage, 50.0);
        assert_eq!(ticker.stop(true).current, 2);
    }

    #[tokio::test]
    async fn test_failed_stop_keeps_reached_step() {
        let (callback, seen) = recording();
        let tracker = ProgressTracker::new(4);
        let ticker = ProgressTicker::start("job-3", tracker.clone(), Duration::from_secs(60), Some(callback));
        tracker.set_stage(JobStage::Uploading);
        tracker.step(100);
        tracker.step(100);

        let last = ticker.stop(false);
        assert_eq!(last.current, 2);
        assert_eq!(last.percentage, 50.0);
        assert_eq!(last.stage, JobStage::Uploading);
        assert_eq!(seen.lock().last().unwrap().current, 2);
    }
}
