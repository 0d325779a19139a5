//! The coordinator of a processing run.
//!
//! Discovery → skip filter → cache filter → scheduler → persist + cache →
//! aggregation. Only this type writes source files or cache entries, and it does
//! so per file after the owning job returned.

use crate::config::RunConfig;
use crate::metrics::Metrics;
use crate::models::{ProcessResult, SystemError};
use crate::services::aggregator::aggregate;
use crate::services::cache::CacheIndex;
use crate::services::processor::{FileOutcome, FileProcessor};
use crate::services::scheduler::{JobOutcome, RunEvent, WorkerScheduler};
use crate::services::skip::{SkipPolicy, SkipResolver};
use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use indexmap::IndexSet;
use serde::Serialize;
use std::fs;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OnceCell, broadcast};
use walkdir::WalkDir;

/// Per-run switches that do not affect the configuration fingerprint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Report changes without writing them
    pub dry_run: bool,

    /// Drop every cache entry before the run
    pub clear_cache: bool,
}

/// A loaded rule as shown by `list-rules`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleInfo {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleListing {
    pub rules: Vec<RuleInfo>,
    /// Rules skipped everywhere by the configuration
    pub skipped_rules: Vec<String>,
}

pub struct ApplicationFileProcessor {
    config: RunConfig,
    skip_resolver: SkipResolver,
    scheduler: WorkerScheduler,
    /// Opened on the first run and kept for later runs of this processor
    cache: OnceCell<CacheIndex>,
    metrics: Arc<Metrics>,
}

impl ApplicationFileProcessor {
    pub fn new(config: RunConfig) -> Self {
        Self::with_skip_resolver(config, SkipResolver::new())
    }

    /// Use a specific resolver, e.g. one without memoization
    pub fn with_skip_resolver(config: RunConfig, skip_resolver: SkipResolver) -> Self {
        let scheduler = WorkerScheduler::new(config.scheduler_settings());
        Self {
            config,
            skip_resolver,
            scheduler,
            cache: OnceCell::new(),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Progress of subsequent runs
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.scheduler.subscribe()
    }

    pub fn skip_policy(&self) -> Result<Arc<SkipPolicy>> {
        let policy = self
            .skip_resolver
            .resolve(&self.config.skip, &self.config.rules, &self.config.root)?;
        Ok(policy)
    }

    /// Candidate files in a stable order, without duplicates.
    ///
    /// Directories are walked for the configured extensions; explicitly listed
    /// files are taken as they are. With no configured paths the root is walked.
    pub fn discover_files(&self) -> Result<Vec<Utf8PathBuf>> {
        let roots = if self.config.paths.is_empty() {
            vec![self.config.root.clone()]
        } else {
            self.config.paths.clone()
        };

        let mut files = IndexSet::new();

        for root in roots {
            if root.is_file() {
                files.insert(root);
                continue;
            }
            if !root.is_dir() {
                bail!("Path does not exist: {}", root);
            }

            for entry in WalkDir::new(&root).sort_by_file_name() {
                let entry = entry.with_context(|| format!("Failed to walk {}", root))?;
                if !entry.file_type().is_file() {
                    continue;
                }

                match Utf8PathBuf::from_path_buf(entry.into_path()) {
                    Ok(path) if self.config.matches_extension(&path) => {
                        files.insert(path);
                    }
                    Ok(_) => {}
                    Err(path) => tracing::warn!("Skipping non UTF-8 path: {}", path.display()),
                }
            }
        }

        Ok(files.into_iter().collect())
    }

    /// Rules of this configuration and the ones skipped everywhere
    pub fn list_rules(&self) -> Result<RuleListing> {
        let policy = self.skip_policy()?;

        Ok(RuleListing {
            rules: self
                .config
                .rules
                .rules()
                .iter()
                .map(|rule| RuleInfo {
                    name: rule.name().to_string(),
                    description: rule.description().to_string(),
                })
                .collect(),
            skipped_rules: policy
                .globally_skipped_symbols()
                .into_iter()
                .map(String::from)
                .collect(),
        })
    }

    /// Run every rule over every candidate file that needs it
    pub async fn run(&self, options: &RunOptions) -> Result<ProcessResult> {
        let cache = self.cache.get_or_try_init(|| async { self.open_cache() }).await?;
        if options.clear_cache {
            cache.clear().context("Failed to clear cache")?;
            self.skip_resolver.clear();
        }

        let policy = self.skip_policy()?;

        let candidates = self.discover_files()?;
        let total_candidates = candidates.len();

        let (files, skipped): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|f| !policy.is_skipped_path(f));
        self.metrics.record_files_skipped(skipped.len());

        let (files, cached): (Vec<_>, Vec<_>) =
            files.into_iter().partition(|f| cache.needs_processing(f));
        self.metrics.record_files_cached(cached.len());

        tracing::info!(
            "{} candidate files: {} skipped, {} unchanged, {} to process",
            total_candidates,
            skipped.len(),
            cached.len(),
            files.len()
        );

        if files.is_empty() {
            return Ok(ProcessResult::default());
        }

        let processor = Arc::new(FileProcessor::new(self.config.rules.clone(), policy));
        let started = Instant::now();

        let mut outcomes = if self.config.parallel.enabled {
            self.scheduler.run(files.clone(), processor).await
        } else {
            let scheduler = self.scheduler.clone();
            let sequential_files = files.clone();
            tokio::task::spawn_blocking(move || scheduler.run_sequential(sequential_files, &processor))
                .await
                .context("Sequential worker crashed")?
        };

        self.metrics.record_processing_time(started.elapsed());
        self.metrics.record_jobs_dispatched(outcomes.len());

        for outcome in &mut outcomes {
            match outcome {
                JobOutcome::Completed { files, .. } => {
                    for file in files.iter_mut() {
                        self.finish_file(file, cache, options);
                    }
                }
                JobOutcome::TimedOut { job, .. } => {
                    self.metrics.record_job_timed_out();
                    self.metrics.record_files_failed(job.files.len());
                }
                JobOutcome::Crashed { job, .. } => {
                    self.metrics.record_files_failed(job.files.len());
                }
            }
        }

        Ok(aggregate(&files, outcomes))
    }

    fn open_cache(&self) -> Result<CacheIndex> {
        let storage = self
            .config
            .cache_backend
            .create_storage(&self.config.cache_directory)
            .context("Failed to open cache")?;
        Ok(CacheIndex::new(storage, self.config.fingerprint()))
    }

    /// Run to completion on a dedicated multi-thread runtime.
    ///
    /// The runtime is shut down without waiting for worker threads of
    /// timed-out jobs, which may never return.
    pub fn run_blocking(&self, options: &RunOptions) -> Result<ProcessResult> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("conductor-worker")
            .build()
            .context("Failed to create tokio runtime")?;

        let result = runtime.block_on(self.run(options));
        runtime.shutdown_background();
        result
    }

    /// Write the change and record the cache entry of one returned file
    fn finish_file(&self, file: &mut FileOutcome, cache: &CacheIndex, options: &RunOptions) {
        if !file.is_success() {
            self.metrics.record_files_failed(1);
            return;
        }

        if let Some(diff) = &file.diff {
            self.metrics.record_file_changed();

            // A dry run leaves the file out of the cache so the change shows again
            if options.dry_run {
                self.metrics.record_file_processed();
                return;
            }

            if let Err(e) = fs::write(&file.file_path, &diff.changed) {
                tracing::error!("Failed to write {}: {}", file.file_path, e);
                file.errors.push(SystemError::for_file(
                    format!("Failed to write file: {}", e),
                    &file.file_path,
                ));
                file.diff = None;
                self.metrics.record_files_failed(1);
                return;
            }
        }

        self.metrics.record_file_processed();

        if let Err(e) = cache.record(&file.file_path) {
            tracing::warn!("Failed to cache {}: {}", file.file_path, e);
        }
    }
}
