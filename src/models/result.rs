use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::fmt;

/// A change produced for one file by one or more rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub file_path: Utf8PathBuf,
    pub original: String,
    pub changed: String,
    /// Rules that modified the file, in application order
    pub applied_rules: Vec<String>,
}

impl FileDiff {
    /// Number of lines that differ between the original and changed source
    pub fn changed_line_count(&self) -> usize {
        let old: Vec<&str> = self.original.lines().collect();
        let new: Vec<&str> = self.changed.lines().collect();
        let common = old.len().min(new.len());

        let differing = (0..common).filter(|&i| old[i] != new[i]).count();
        differing + old.len().max(new.len()) - common
    }
}

/// An error surfaced to the user at the end of a run.
///
/// Per-file rule failures, abandoned jobs and crashed workers all end up here.
/// The presence of any `SystemError` forces [`ExitStatus::Failure`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemError {
    pub message: String,
    pub file_path: Option<Utf8PathBuf>,
    pub rule_name: Option<String>,
}

impl SystemError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file_path: None,
            rule_name: None,
        }
    }

    pub fn for_file(message: impl Into<String>, file_path: &Utf8Path) -> Self {
        Self {
            message: message.into(),
            file_path: Some(file_path.to_path_buf()),
            rule_name: None,
        }
    }

    pub fn with_rule(mut self, rule_name: impl Into<String>) -> Self {
        self.rule_name = Some(rule_name.into());
        self
    }
}

impl fmt::Display for SystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file_path, &self.rule_name) {
            (Some(path), Some(rule)) => write!(f, "{} [{}]: {}", path, rule, self.message),
            (Some(path), None) => write!(f, "{}: {}", path, self.message),
            (None, _) => write!(f, "{}", self.message),
        }
    }
}

/// Final, ordered result of a run.
///
/// Both lists follow the original input file order, never completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessResult {
    pub errors: Vec<SystemError>,
    pub file_diffs: Vec<FileDiff>,
}

impl ProcessResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_changes(&self) -> bool {
        !self.file_diffs.is_empty()
    }
}

/// Process exit status of the `process` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    ChangedCode,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::ChangedCode => 2,
        }
    }
}
