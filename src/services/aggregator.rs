//! Merging job outcomes into one deterministic result.

use crate::models::{ExitStatus, ProcessResult, SystemError};
use crate::services::scheduler::JobOutcome;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;

/// Merge `outcomes` into a [`ProcessResult`] ordered by position in `input_order`.
///
/// The sort is stable, so several errors for one file keep their reported
/// order. Errors without a file, or for a file not in `input_order`, go last.
pub fn aggregate(input_order: &[Utf8PathBuf], outcomes: Vec<JobOutcome>) -> ProcessResult {
    let positions: HashMap<&Utf8Path, usize> = input_order
        .iter()
        .enumerate()
        .map(|(position, path)| (path.as_path(), position))
        .collect();
    let position_of = |path: Option<&Utf8Path>| {
        path.and_then(|p| positions.get(p).copied())
            .unwrap_or(usize::MAX)
    };

    let mut result = ProcessResult::default();

    for outcome in outcomes {
        match outcome {
            JobOutcome::Completed { files, .. } => {
                for file in files {
                    result.errors.extend(file.errors);
                    result.file_diffs.extend(file.diff);
                }
            }
            JobOutcome::TimedOut { error, .. } | JobOutcome::Crashed { error, .. } => {
                result.errors.push(error);
            }
        }
    }

    result
        .errors
        .sort_by_key(|e: &SystemError| position_of(e.file_path.as_deref()));
    result
        .file_diffs
        .sort_by_key(|d| position_of(Some(d.file_path.as_path())));

    result
}

/// Exit status of a run, decided in this order: errors, mode, diffs
pub fn resolve_exit_status(result: &ProcessResult, dry_run: bool) -> ExitStatus {
    if result.has_errors() {
        ExitStatus::Failure
    } else if !dry_run {
        ExitStatus::Success
    } else if result.has_changes() {
        ExitStatus::ChangedCode
    } else {
        ExitStatus::Success
    }
}
