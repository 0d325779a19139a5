//! Services module - the processing pipeline.
//!
//! Nothing in here knows about the command line; the binary only builds a
//! [`RunConfig`](crate::config::RunConfig) and hands it to
//! [`ApplicationFileProcessor`].
//!
//! # Components
//!
//! - [`ImportReconciler`]: per-file accumulation and first-come first-served
//!   resolution of import requests made by rules
//! - [`UseStatements`]: reads existing `use` statements and renders resolved ones
//! - [`SkipPolicy`] / [`SkipResolver`]: classified skip criteria, memoized per process
//! - [`CacheIndex`]: fingerprint based change detection over a [`CacheStorage`]
//! - [`FileProcessor`]: applies the rule set to one file through a [`FileContext`]
//! - [`WorkerScheduler`]: bounded parallel dispatch of file batches with timeouts
//! - [`aggregate`] / [`resolve_exit_status`]: deterministic result and exit code
//! - [`ApplicationFileProcessor`]: the coordinator wiring all of the above
//!
//! # Flow
//!
//! 1. Discover candidate files
//! 2. Drop skipped paths, then files the cache says are unchanged
//! 3. Partition into jobs and run them on the worker pool
//! 4. Write changed files and record cache entries, per file
//! 5. Aggregate into input order and derive the exit status

pub mod aggregator;
pub mod application;
pub mod cache;
pub mod imports;
pub mod processor;
pub mod scheduler;
pub mod skip;
pub mod use_statements;

pub use aggregator::{aggregate, resolve_exit_status};
pub use application::{ApplicationFileProcessor, RuleInfo, RuleListing, RunOptions};
pub use cache::{CacheBackend, CacheError, CacheIndex, CacheStorage, FileCacheStorage, MemoryCacheStorage};
pub use imports::{ExistingUseMap, ImportKind, ImportOutcome, ImportReconciler, ResolvedImport};
pub use processor::{FileContext, FileOutcome, FileProcessor};
pub use scheduler::{Job, JobOutcome, RunEvent, SchedulerSettings, WorkerScheduler, partition};
pub use skip::{ClassLookup, SkipEntry, SkipPolicy, SkipResolver};
pub use use_statements::UseStatements;
