// Run metrics
//
// Lock-free counters for one processing run, logged as a summary at the end

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters of one run.
///
/// Updated by the coordinator as outcomes arrive; atomics keep it shareable
/// behind `Arc` without a lock.
#[derive(Debug)]
pub struct Metrics {
    /// Files that went through every rule without error
    pub files_processed: AtomicUsize,

    /// Files whose source changed
    pub files_changed: AtomicUsize,

    /// Files with at least one error, including files of abandoned jobs
    pub files_failed: AtomicUsize,

    /// Files excluded by skip criteria
    pub files_skipped: AtomicUsize,

    /// Files left out because the cache says nothing changed
    pub files_cached: AtomicUsize,

    pub jobs_dispatched: AtomicUsize,

    pub jobs_timed_out: AtomicUsize,

    /// Wall time spent inside the scheduler, in milliseconds
    pub processing_time_ms: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            files_processed: AtomicUsize::new(0),
            files_changed: AtomicUsize::new(0),
            files_failed: AtomicUsize::new(0),
            files_skipped: AtomicUsize::new(0),
            files_cached: AtomicUsize::new(0),
            jobs_dispatched: AtomicUsize::new(0),
            jobs_timed_out: AtomicUsize::new(0),
            processing_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_file_processed(&self) {
        self.files_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_changed(&self) {
        self.files_changed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_files_failed(&self, count: usize) {
        self.files_failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_files_skipped(&self, count: usize) {
        self.files_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_files_cached(&self, count: usize) {
        self.files_cached.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_jobs_dispatched(&self, count: usize) {
        self.jobs_dispatched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_job_timed_out(&self) {
        self.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processing_time(&self, duration: Duration) {
        self.processing_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average processing time per completed file in milliseconds
    pub fn avg_processing_time_ms(&self) -> f64 {
        let total = self.processing_time_ms.load(Ordering::Relaxed);
        let count = self.files_processed.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Run Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Files: {} processed, {} changed, {} failed",
            self.files_processed.load(Ordering::Relaxed),
            self.files_changed.load(Ordering::Relaxed),
            self.files_failed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Not processed: {} skipped, {} unchanged since last run",
            self.files_skipped.load(Ordering::Relaxed),
            self.files_cached.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Jobs: {} dispatched, {} timed out",
            self.jobs_dispatched.load(Ordering::Relaxed),
            self.jobs_timed_out.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Processing time: {:.2}s (avg: {:.2}ms per file)",
            self.processing_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_processing_time_ms()
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.files_processed.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.jobs_timed_out.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_file_counters() {
        let metrics = Metrics::new();

        metrics.record_file_processed();
        metrics.record_file_processed();
        metrics.record_file_changed();
        metrics.record_files_failed(3);
        metrics.record_files_skipped(2);
        metrics.record_files_cached(4);

        assert_eq!(metrics.files_processed.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.files_changed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.files_failed.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.files_skipped.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.files_cached.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_job_counters() {
        let metrics = Metrics::new();

        metrics.record_jobs_dispatched(5);
        metrics.record_job_timed_out();

        assert_eq!(metrics.jobs_dispatched.load(Ordering::Relaxed), 5);
        assert_eq!(metrics.jobs_timed_out.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_avg_processing_time() {
        let metrics = Metrics::new();
        assert_eq!(metrics.avg_processing_time_ms(), 0.0);

        metrics.record_file_processed();
        metrics.record_file_processed();
        metrics.record_processing_time(Duration::from_millis(300));

        assert_eq!(metrics.processing_time_ms.load(Ordering::Relaxed), 300);
        assert_eq!(metrics.avg_processing_time_ms(), 150.0);
    }

    #[test]
    fn test_uptime() {
        let metrics = Metrics::new();
        thread::sleep(Duration::from_millis(10));
        assert!(metrics.uptime().as_millis() >= 10);
    }
}
