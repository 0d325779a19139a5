//! Data models for Conductor.
//!
//! - [`FileConfig`]: the serialized project configuration (`conductor.yaml`), including
//!   the heterogeneous [`SkipCriterion`] list and [`RuleSpec`] references
//! - [`ProcessResult`]: ordered diffs and errors of one run
//! - [`ExitStatus`]: the three-state exit code derived from a result
//!
//! # Architecture Note
//!
//! Config models are plain serde structs. They are validated once by
//! [`ConfigBuilder`](crate::config::ConfigBuilder) and never interpreted ad hoc
//! while files are being processed.

pub mod config;
pub mod result;

pub use config::{FileConfig, ParallelSettings, RuleSpec, SkipCriterion, SkipScope};
pub use result::{ExitStatus, FileDiff, ProcessResult, SystemError};
