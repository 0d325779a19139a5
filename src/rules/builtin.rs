//! Rules shipped with the binary.
//!
//! The rule catalogue proper lives outside this crate; these two exist so that
//! a bare configuration has something to run and so the import side channel is
//! exercised end to end.

use super::{Rule, RuleError};
use crate::config::ConfigurationError;
use crate::services::imports::ImportKind;
use crate::services::processor::FileContext;
use crate::services::use_statements::replace_qualified_references;
use indexmap::IndexMap;
use std::sync::Arc;

pub const TRIM_TRAILING_WHITESPACE: &str = "trim-trailing-whitespace";
pub const RENAME_CLASS: &str = "rename-class";

const BUILTIN_RULES: &[&str] = &[TRIM_TRAILING_WHITESPACE, RENAME_CLASS];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_RULES.contains(&name)
}

/// Instantiate a built-in rule by name
pub fn create_rule(
    name: &str,
    options: Option<&IndexMap<String, String>>,
) -> Result<Arc<dyn Rule>, ConfigurationError> {
    match name {
        TRIM_TRAILING_WHITESPACE => Ok(Arc::new(TrimTrailingWhitespaceRule)),
        RENAME_CLASS => {
            let renames = options.cloned().unwrap_or_default();
            Ok(Arc::new(RenameClassRule::new(renames)?))
        }
        _ => Err(ConfigurationError::UnknownRules(vec![name.to_string()])),
    }
}

/// Removes spaces and tabs at the end of every line
#[derive(Debug, Default)]
pub struct TrimTrailingWhitespaceRule;

impl Rule for TrimTrailingWhitespaceRule {
    fn name(&self) -> &str {
        TRIM_TRAILING_WHITESPACE
    }

    fn description(&self) -> &str {
        "Remove trailing spaces and tabs"
    }

    fn apply(&self, file: &mut FileContext<'_>) -> Result<(), RuleError> {
        let source = file.source();
        let mut trimmed: String = source
            .lines()
            .map(|line| line.trim_end_matches([' ', '\t']))
            .collect::<Vec<_>>()
            .join("\n");

        if source.ends_with('\n') {
            trimmed.push('\n');
        }

        if trimmed != source {
            file.set_source(trimmed);
        }
        Ok(())
    }
}

/// Renames fully qualified class references and imports the new name
#[derive(Debug)]
pub struct RenameClassRule {
    renames: IndexMap<String, String>,
}

impl RenameClassRule {
    pub fn new(renames: IndexMap<String, String>) -> Result<Self, ConfigurationError> {
        let mut normalized = IndexMap::new();

        for (old, new) in renames {
            let old = old.trim().trim_start_matches('\\').to_string();
            let new = new.trim().trim_start_matches('\\').to_string();

            if old.is_empty() || new.is_empty() {
                return Err(ConfigurationError::InvalidRuleConfiguration {
                    rule: RENAME_CLASS.to_string(),
                    message: "class names must not be empty".to_string(),
                });
            }
            normalized.insert(old, new);
        }

        Ok(Self {
            renames: normalized,
        })
    }
}

impl Rule for RenameClassRule {
    fn name(&self) -> &str {
        RENAME_CLASS
    }

    fn description(&self) -> &str {
        "Rename classes by fully qualified name"
    }

    fn configuration(&self) -> String {
        self.renames
            .iter()
            .map(|(old, new)| format!("{}={}", old, new))
            .collect::<Vec<_>>()
            .join(";")
    }

    fn apply(&self, file: &mut FileContext<'_>) -> Result<(), RuleError> {
        for (old, new) in &self.renames {
            let replacement = format!("\\{}", new);
            let renamed = replace_qualified_references(file.source(), old, &replacement);

            if renamed != file.source() {
                file.set_source(renamed);
                file.request_import(ImportKind::Class, new, None);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::imports::{ExistingUseMap, ImportOutcome, ImportReconciler};
    use camino::Utf8Path;

    #[test]
    fn test_trim_trailing_whitespace() {
        let path = Utf8Path::new("/src/a.php");
        let mut imports = ImportReconciler::new();
        let mut file = FileContext::new(path, "<?php  \necho 1;\t\n".to_string(), &mut imports);

        TrimTrailingWhitespaceRule.apply(&mut file).unwrap();
        assert_eq!(file.source(), "<?php\necho 1;\n");
    }

    #[test]
    fn test_rename_class_requests_import() {
        let path = Utf8Path::new("/src/a.php");
        let mut renames = IndexMap::new();
        renames.insert("\\Old\\Mailer".to_string(), "New\\Mailer".to_string());
        let rule = RenameClassRule::new(renames).unwrap();

        let mut imports = ImportReconciler::new();
        {
            let mut file =
                FileContext::new(path, "<?php\n$m = new \\Old\\Mailer();\n".to_string(), &mut imports);
            rule.apply(&mut file).unwrap();
            assert_eq!(file.source(), "<?php\n$m = new \\New\\Mailer();\n");
        }

        let resolved = imports.resolve(path, &ExistingUseMap::new());
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].target_name, "New\\Mailer");
        assert_eq!(resolved[0].outcome, ImportOutcome::AddedAsUse);
    }

    #[test]
    fn test_rename_class_without_match_changes_nothing() {
        let path = Utf8Path::new("/src/a.php");
        let mut renames = IndexMap::new();
        renames.insert("Old\\Mailer".to_string(), "New\\Mailer".to_string());
        let rule = RenameClassRule::new(renames).unwrap();

        let mut imports = ImportReconciler::new();
        let mut file = FileContext::new(path, "<?php\n".to_string(), &mut imports);
        rule.apply(&mut file).unwrap();

        assert!(!file.is_modified());
        drop(file);
        assert!(!imports.has_pending(path));
    }

    #[test]
    fn test_create_rule() {
        assert_eq!(create_rule(TRIM_TRAILING_WHITESPACE, None).unwrap().name(), TRIM_TRAILING_WHITESPACE);

        let err = create_rule("no-such-rule", None).err().unwrap();
        assert!(err.to_string().contains("no-such-rule"));

        let mut empty = IndexMap::new();
        empty.insert(String::new(), "New".to_string());
        assert!(create_rule(RENAME_CLASS, Some(&empty)).is_err());
    }
}
