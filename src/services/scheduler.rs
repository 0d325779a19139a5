//! Bounded parallel dispatch of file batches.
//!
//! Files are cut into contiguous [`Job`]s. Every job is spawned at once and
//! queues on a semaphore holding `max_workers` permits; a job that gets a permit
//! runs its files on a blocking worker thread and reports back over an `mpsc`
//! channel. The per-job timeout starts once the permit is held, so queueing time
//! never counts against a job.
//!
//! A timed-out job is abandoned: its worker thread cannot be interrupted, but
//! whatever it produces is dropped and never written or cached. The thread
//! keeps its permit until it returns, so abandoned threads still count against
//! `max_workers`.

use crate::models::{ParallelSettings, SystemError};
use crate::services::processor::{FileOutcome, FileProcessor};
use camino::Utf8PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast, mpsc};
use tokio::time::timeout;

/// An ordered batch of files with its position among all jobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub index: usize,
    pub files: Vec<Utf8PathBuf>,
}

/// What came back from one job
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed { job: Job, files: Vec<FileOutcome> },
    TimedOut { job: Job, error: SystemError },
    Crashed { job: Job, error: SystemError },
}

impl JobOutcome {
    pub fn job(&self) -> &Job {
        match self {
            JobOutcome::Completed { job, .. }
            | JobOutcome::TimedOut { job, .. }
            | JobOutcome::Crashed { job, .. } => job,
        }
    }
}

/// Progress events published while a run is in flight
#[derive(Clone, Debug, PartialEq)]
pub enum RunEvent {
    Started { total_files: usize, total_jobs: usize },

    JobCompleted { index: usize, files: usize, finished_jobs: usize, total_jobs: usize },

    JobTimedOut { index: usize, files: usize },

    JobCrashed { index: usize, files: usize },

    Finished { total_jobs: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub max_workers: usize,
    pub job_size: usize,
    pub timeout: Duration,
}

impl SchedulerSettings {
    pub fn new(max_workers: usize, job_size: usize, timeout: Duration) -> Self {
        Self {
            max_workers: max_workers.max(1),
            job_size: job_size.max(1),
            timeout,
        }
    }
}

impl From<&ParallelSettings> for SchedulerSettings {
    fn from(settings: &ParallelSettings) -> Self {
        Self::new(
            settings.max_processes,
            settings.job_size,
            Duration::from_secs(settings.job_timeout_seconds),
        )
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&ParallelSettings::default())
    }
}

/// Cut `files` into contiguous jobs of at most `job_size` files
pub fn partition(files: &[Utf8PathBuf], job_size: usize) -> Vec<Job> {
    files
        .chunks(job_size.max(1))
        .enumerate()
        .map(|(index, chunk)| Job {
            index,
            files: chunk.to_vec(),
        })
        .collect()
}

#[derive(Clone)]
pub struct WorkerScheduler {
    settings: SchedulerSettings,
    events: broadcast::Sender<RunEvent>,
}

impl WorkerScheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        let (events, _) = broadcast::channel(100);
        Self { settings, events }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Subscribe to progress events of subsequent runs
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Run every file through `processor` on the worker pool.
    ///
    /// Outcomes are returned ordered by job index.
    pub async fn run(&self, files: Vec<Utf8PathBuf>, processor: Arc<FileProcessor>) -> Vec<JobOutcome> {
        let jobs = partition(&files, self.settings.job_size);
        let total_jobs = jobs.len();

        tracing::info!(
            "Dispatching {} files in {} jobs (max workers: {}, timeout: {:?})",
            files.len(),
            total_jobs,
            self.settings.max_workers,
            self.settings.timeout
        );
        self.publish(RunEvent::Started {
            total_files: files.len(),
            total_jobs,
        });

        let semaphore = Arc::new(Semaphore::new(self.settings.max_workers));
        let (outcome_tx, mut outcome_rx) = mpsc::channel(total_jobs.max(1));

        for job in jobs {
            let semaphore = semaphore.clone();
            let outcome_tx = outcome_tx.clone();
            let processor = processor.clone();
            let job_timeout = self.settings.timeout;

            tokio::spawn(async move {
                let permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                let outcome = run_job(job, processor, job_timeout, permit).await;
                if outcome_tx.send(outcome).await.is_err() {
                    tracing::warn!("Outcome receiver dropped before job finished");
                }
            });
        }

        // The loop below ends once every task has sent and dropped its sender
        drop(outcome_tx);

        let mut outcomes = Vec::with_capacity(total_jobs);
        while let Some(outcome) = outcome_rx.recv().await {
            let job = outcome.job();
            let event = match &outcome {
                JobOutcome::Completed { .. } => RunEvent::JobCompleted {
                    index: job.index,
                    files: job.files.len(),
                    finished_jobs: outcomes.len() + 1,
                    total_jobs,
                },
                JobOutcome::TimedOut { .. } => RunEvent::JobTimedOut {
                    index: job.index,
                    files: job.files.len(),
                },
                JobOutcome::Crashed { .. } => RunEvent::JobCrashed {
                    index: job.index,
                    files: job.files.len(),
                },
            };
            self.publish(event);
            outcomes.push(outcome);
        }

        outcomes.sort_by_key(|o| o.job().index);
        self.publish(RunEvent::Finished { total_jobs });
        outcomes
    }

    /// Run every file in the calling thread as a single job, without timeout
    pub fn run_sequential(&self, files: Vec<Utf8PathBuf>, processor: &FileProcessor) -> Vec<JobOutcome> {
        if files.is_empty() {
            self.publish(RunEvent::Started { total_files: 0, total_jobs: 0 });
            self.publish(RunEvent::Finished { total_jobs: 0 });
            return Vec::new();
        }

        tracing::info!("Processing {} files sequentially", files.len());
        self.publish(RunEvent::Started {
            total_files: files.len(),
            total_jobs: 1,
        });

        let job = Job { index: 0, files };
        let outcomes = processor.process_files(&job.files);

        self.publish(RunEvent::JobCompleted {
            index: 0,
            files: job.files.len(),
            finished_jobs: 1,
            total_jobs: 1,
        });
        self.publish(RunEvent::Finished { total_jobs: 1 });

        vec![JobOutcome::Completed { job, files: outcomes }]
    }

    fn publish(&self, event: RunEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

async fn run_job(
    job: Job,
    processor: Arc<FileProcessor>,
    job_timeout: Duration,
    permit: OwnedSemaphorePermit,
) -> JobOutcome {
    let files = job.files.clone();
    let worker = tokio::task::spawn_blocking(move || {
        // Released when the thread returns, not when the job times out
        let _permit = permit;
        processor.process_files(&files)
    });

    match timeout(job_timeout, worker).await {
        Ok(Ok(files)) => JobOutcome::Completed { job, files },
        Ok(Err(join_error)) => {
            tracing::error!("Worker for job {} crashed: {}", job.index, join_error);
            let error = batch_error(&job, format!("Worker crashed: {}", join_error));
            JobOutcome::Crashed { job, error }
        }
        Err(_) => {
            tracing::warn!("Job {} timed out after {:?}", job.index, job_timeout);
            let error = batch_error(
                &job,
                format!(
                    "Job timed out after {}s; {} files were not processed",
                    job_timeout.as_secs_f64(),
                    job.files.len()
                ),
            );
            JobOutcome::TimedOut { job, error }
        }
    }
}

/// One error for a whole batch, attributed to its first file
fn batch_error(job: &Job, message: String) -> SystemError {
    let listing = job
        .files
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let message = format!("{} [{}]", message, listing);

    match job.files.first() {
        Some(first) => SystemError::for_file(message, first),
        None => SystemError::new(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Rule, RuleError, RuleRegistry};
    use crate::services::processor::FileContext;
    use crate::services::skip::SkipPolicy;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct AppendRule;

    impl Rule for AppendRule {
        fn name(&self) -> &str {
            "append"
        }

        fn apply(&self, file: &mut FileContext<'_>) -> Result<(), RuleError> {
            let source = format!("{}// seen\n", file.source());
            file.set_source(source);
            Ok(())
        }
    }

    struct SleepingRule(Duration);

    impl Rule for SleepingRule {
        fn name(&self) -> &str {
            "sleeping"
        }

        fn apply(&self, file: &mut FileContext<'_>) -> Result<(), RuleError> {
            if file.file_path().as_str().ends_with("slow.php") {
                std::thread::sleep(self.0);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct WorkerCounters {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    struct TrackingRule {
        counters: Arc<WorkerCounters>,
        delay: Duration,
    }

    impl Rule for TrackingRule {
        fn name(&self) -> &str {
            "tracking"
        }

        fn apply(&self, _file: &mut FileContext<'_>) -> Result<(), RuleError> {
            let now = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.counters.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn files(temp_dir: &TempDir, names: &[&str]) -> Vec<Utf8PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = Utf8PathBuf::try_from(temp_dir.path().join(name)).unwrap();
                fs::write(&path, "<?php\n").unwrap();
                path
            })
            .collect()
    }

    fn processor(rule: Arc<dyn Rule>) -> Arc<FileProcessor> {
        Arc::new(FileProcessor::new(
            RuleRegistry::new(vec![rule]).unwrap(),
            Arc::new(SkipPolicy::default()),
        ))
    }

    #[test]
    fn test_partition_is_contiguous() {
        let files: Vec<Utf8PathBuf> = (0..5).map(|i| Utf8PathBuf::from(format!("{}.php", i))).collect();
        let jobs = partition(&files, 2);

        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].files, files[0..2]);
        assert_eq!(jobs[2].files, files[4..5]);
        assert_eq!(jobs[2].index, 2);

        assert!(partition(&[], 2).is_empty());
        assert_eq!(partition(&files, 0).len(), 5);
    }

    #[tokio::test]
    async fn test_parallel_matches_sequential() {
        let temp_dir = TempDir::new().unwrap();
        let files = files(&temp_dir, &["a.php", "b.php", "c.php", "d.php", "e.php"]);
        let processor = processor(Arc::new(AppendRule));

        let scheduler = WorkerScheduler::new(SchedulerSettings::new(3, 2, Duration::from_secs(30)));
        let parallel: Vec<FileOutcome> = scheduler
            .run(files.clone(), processor.clone())
            .await
            .into_iter()
            .flat_map(|o| match o {
                JobOutcome::Completed { files, .. } => files,
                other => panic!("unexpected outcome: {:?}", other),
            })
            .collect();

        let sequential: Vec<FileOutcome> = scheduler
            .run_sequential(files, &processor)
            .into_iter()
            .flat_map(|o| match o {
                JobOutcome::Completed { files, .. } => files,
                other => panic!("unexpected outcome: {:?}", other),
            })
            .collect();

        assert_eq!(parallel, sequential);
    }

    #[tokio::test]
    async fn test_timed_out_job_yields_single_error() {
        let temp_dir = TempDir::new().unwrap();
        let files = files(&temp_dir, &["a.php", "slow.php", "c.php"]);
        let processor = processor(Arc::new(SleepingRule(Duration::from_millis(1500))));

        let scheduler = WorkerScheduler::new(SchedulerSettings::new(2, 2, Duration::from_millis(200)));
        let outcomes = scheduler.run(files.clone(), processor).await;

        assert_eq!(outcomes.len(), 2);
        match &outcomes[0] {
            JobOutcome::TimedOut { job, error } => {
                assert_eq!(job.files, files[0..2]);
                assert_eq!(error.file_path.as_ref(), Some(&files[0]));
                assert!(error.message.contains("timed out"));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(matches!(&outcomes[1], JobOutcome::Completed { files, .. } if files.len() == 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_workers_keep_their_slot() {
        let temp_dir = TempDir::new().unwrap();
        let files = files(&temp_dir, &["a.php", "b.php", "c.php"]);
        let counters = Arc::new(WorkerCounters::default());
        let rule = TrackingRule {
            counters: Arc::clone(&counters),
            delay: Duration::from_millis(400),
        };

        let scheduler = WorkerScheduler::new(SchedulerSettings::new(1, 1, Duration::from_millis(100)));
        let outcomes = scheduler.run(files, processor(Arc::new(rule))).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| matches!(o, JobOutcome::TimedOut { .. })));
        assert_eq!(counters.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_progress_events() {
        let temp_dir = TempDir::new().unwrap();
        let files = files(&temp_dir, &["a.php", "b.php", "c.php"]);

        let scheduler = WorkerScheduler::new(SchedulerSettings::new(1, 2, Duration::from_secs(30)));
        let mut events = scheduler.subscribe();
        scheduler.run(files, processor(Arc::new(AppendRule))).await;

        assert_eq!(
            events.recv().await.unwrap(),
            RunEvent::Started { total_files: 3, total_jobs: 2 }
        );

        let mut completed = 0;
        loop {
            match events.recv().await.unwrap() {
                RunEvent::JobCompleted { .. } => completed += 1,
                RunEvent::Finished { total_jobs } => {
                    assert_eq!(total_jobs, 2);
                    break;
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(completed, 2);
    }

    #[test]
    fn test_run_with_no_files() {
        let scheduler = WorkerScheduler::new(SchedulerSettings::default());
        let processor = processor(Arc::new(AppendRule));
        assert!(scheduler.run_sequential(Vec::new(), &processor).is_empty());
        assert!(tokio_test::block_on(scheduler.run(Vec::new(), processor)).is_empty());
    }

    #[test]
    fn test_settings_from_parallel_config() {
        let settings = SchedulerSettings::from(&ParallelSettings::default());
        assert_eq!(settings.max_workers, 16);
        assert_eq!(settings.job_size, 20);
        assert_eq!(settings.timeout, Duration::from_secs(120));
    }
}
