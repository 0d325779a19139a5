//! Applying the rule set to files.
//!
//! Every file gets its own [`FileContext`]; there is no ambient "current file".
//! Import requests go through the context into an [`ImportReconciler`] that the
//! job resets at each file boundary.

use crate::models::{FileDiff, SystemError};
use crate::rules::RuleRegistry;
use crate::services::imports::{ImportKind, ImportReconciler};
use crate::services::skip::SkipPolicy;
use crate::services::use_statements::UseStatements;
use camino::{Utf8Path, Utf8PathBuf};
use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Per-file processing context handed to each rule
pub struct FileContext<'a> {
    file_path: &'a Utf8Path,
    source: String,
    revision: usize,
    imports: &'a mut ImportReconciler,
}

impl<'a> FileContext<'a> {
    pub fn new(file_path: &'a Utf8Path, source: String, imports: &'a mut ImportReconciler) -> Self {
        Self {
            file_path,
            source,
            revision: 0,
            imports,
        }
    }

    pub fn file_path(&self) -> &Utf8Path {
        self.file_path
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn set_source(&mut self, source: String) {
        self.source = source;
        self.revision += 1;
    }

    pub fn is_modified(&self) -> bool {
        self.revision > 0
    }

    /// Ask for `target_name` to be imported into this file.
    ///
    /// The rule should keep referencing the symbol fully qualified
    /// (`\App\Kernel`); the reference is shortened after reconciliation if the
    /// import could be added.
    pub fn request_import(&mut self, kind: ImportKind, target_name: &str, alias: Option<&str>) {
        self.imports
            .record_import(self.file_path, kind, target_name, alias);
    }

    fn into_source(self) -> String {
        self.source
    }
}

/// Result of processing one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub file_path: Utf8PathBuf,
    pub diff: Option<FileDiff>,
    pub errors: Vec<SystemError>,
}

impl FileOutcome {
    fn failed(file_path: &Utf8Path, error: SystemError) -> Self {
        Self {
            file_path: file_path.to_path_buf(),
            diff: None,
            errors: vec![error],
        }
    }

    /// The file went through every rule without error
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the rule set over files. Immutable, shared by every worker.
pub struct FileProcessor {
    rules: RuleRegistry,
    skip_policy: Arc<SkipPolicy>,
    use_statements: UseStatements,
}

impl FileProcessor {
    pub fn new(rules: RuleRegistry, skip_policy: Arc<SkipPolicy>) -> Self {
        Self {
            rules,
            skip_policy,
            use_statements: UseStatements::new(),
        }
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    /// Process a batch sequentially with one reconciler, reset per file
    pub fn process_files(&self, files: &[Utf8PathBuf]) -> Vec<FileOutcome> {
        let mut imports = ImportReconciler::new();

        files
            .iter()
            .map(|file_path| {
                let outcome = self.process_file(file_path, &mut imports);
                imports.reset(file_path);
                outcome
            })
            .collect()
    }

    /// Apply every rule not skipped for this file, then reconcile imports.
    ///
    /// A rule error or panic aborts the file: one error, no diff.
    pub fn process_file(&self, file_path: &Utf8Path, imports: &mut ImportReconciler) -> FileOutcome {
        let original = match fs::read_to_string(file_path) {
            Ok(content) => content,
            Err(e) => {
                tracing::error!("Failed to read {}: {}", file_path, e);
                return FileOutcome::failed(
                    file_path,
                    SystemError::for_file(format!("Failed to read file: {}", e), file_path),
                );
            }
        };

        let existing = self.use_statements.extract(&original);
        let mut applied_rules = Vec::new();
        let mut context = FileContext::new(file_path, original.clone(), imports);

        for rule in self.rules.rules() {
            if self.skip_policy.is_skipped_symbol(rule.name(), file_path) {
                tracing::trace!("Rule {} skipped for {}", rule.name(), file_path);
                continue;
            }

            let revision = context.revision;
            let result = panic::catch_unwind(AssertUnwindSafe(|| rule.apply(&mut context)));

            let error = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(payload) => Some(format!("Rule panicked: {}", panic_message(payload.as_ref()))),
            };

            if let Some(message) = error {
                tracing::error!("Rule {} failed on {}: {}", rule.name(), file_path, message);
                return FileOutcome::failed(
                    file_path,
                    SystemError::for_file(message, file_path).with_rule(rule.name()),
                );
            }

            if context.revision != revision {
                applied_rules.push(rule.name().to_string());
            }
        }

        let mut changed = context.into_source();

        if imports.has_pending(file_path) {
            let resolved = imports.resolve(file_path, &existing);
            changed = self.use_statements.render(&changed, &resolved);
        }

        let diff = (changed != original).then(|| FileDiff {
            file_path: file_path.to_path_buf(),
            original,
            changed,
            applied_rules,
        });

        if diff.is_some() {
            tracing::debug!("Changed: {}", file_path);
        }

        FileOutcome {
            file_path: file_path.to_path_buf(),
            diff,
            errors: Vec::new(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
