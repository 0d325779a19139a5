//! Rule contract and registry.
//!
//! A [`Rule`] sees one file at a time through a
//! [`FileContext`](crate::services::processor::FileContext). It may rewrite the
//! source and may request imports as a side channel. Rules know nothing about
//! each other and must not rely on their relative order for shared short names.

pub mod builtin;

use crate::config::ConfigurationError;
use crate::services::processor::FileContext;
use crate::services::skip::ClassLookup;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a rule on a single file
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuleError {
    pub fn failed(message: impl Into<String>) -> Self {
        RuleError::Failed(message.into())
    }
}

/// A pluggable rewrite of one category of construct
pub trait Rule: Send + Sync {
    /// Unique name, also the key used in `skip` entries
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Canonical form of the rule's configuration, part of the cache fingerprint
    fn configuration(&self) -> String {
        String::new()
    }

    fn apply(&self, file: &mut FileContext<'_>) -> Result<(), RuleError>;
}

/// Names occurring more than once, each reported once, in first-seen order
pub fn find_duplicates<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = Vec::new();
    let mut duplicates: Vec<String> = Vec::new();

    for name in names {
        if seen.contains(&name) {
            if !duplicates.iter().any(|d| d == name) {
                duplicates.push(name.to_string());
            }
        } else {
            seen.push(name);
        }
    }

    duplicates
}

/// Ordered, duplicate-free set of rules for one run.
///
/// Immutable once built, shared with every worker through `Arc`.
/// [`reset`](Self::reset) and [`rebuild`](Self::rebuild) exist so tests can
/// re-register rules without reaching into internals.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<Arc<dyn Rule>>,
}

impl RuleRegistry {
    pub fn new(rules: Vec<Arc<dyn Rule>>) -> Result<Self, ConfigurationError> {
        let duplicates = find_duplicates(rules.iter().map(|r| r.name()));
        if !duplicates.is_empty() {
            return Err(ConfigurationError::DuplicateRules(duplicates));
        }

        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }

    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.iter().any(|r| r.name() == name)
    }

    pub fn reset(&mut self) {
        self.rules.clear();
    }

    pub fn rebuild(&mut self, rules: Vec<Arc<dyn Rule>>) -> Result<(), ConfigurationError> {
        *self = Self::new(rules)?;
        Ok(())
    }

    /// Name and configuration of every rule, in order
    pub fn fingerprint_input(&self) -> Vec<(String, String)> {
        self.rules
            .iter()
            .map(|r| (r.name().to_string(), r.configuration()))
            .collect()
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.names())
            .finish()
    }
}

impl ClassLookup for RuleRegistry {
    fn has_class(&self, name: &str) -> bool {
        self.contains(name) || builtin::is_builtin(name)
    }
}
