//! Skip criteria: which files, and which rules in which files, are excluded.
//!
//! The heterogeneous `skip` list from the configuration is classified exactly
//! once into tagged [`SkipEntry`] values. Matching never looks at the raw list.

use crate::config::ConfigurationError;
use crate::models::SkipCriterion;
use camino::{Utf8Path, Utf8PathBuf};
use globset::{Glob, GlobMatcher};
use std::sync::{Arc, PoisonError, RwLock};

/// Reflection provider used to validate class-keyed skip entries
#[cfg_attr(test, mockall::automock)]
pub trait ClassLookup: Send + Sync {
    fn has_class(&self, name: &str) -> bool;
}

/// A normalized literal path or a compiled glob
#[derive(Debug, Clone)]
pub enum PathPattern {
    Literal(String),
    Glob { pattern: String, matcher: GlobMatcher },
}

impl PathPattern {
    fn compile(raw: &str, root: &Utf8Path) -> Result<Self, String> {
        let normalized = normalize_path(raw, root);

        if normalized.contains('*') {
            let matcher = Glob::new(&normalized)
                .map_err(|e| format!("{} ({})", raw, e))?
                .compile_matcher();
            Ok(PathPattern::Glob {
                pattern: normalized,
                matcher,
            })
        } else {
            Ok(PathPattern::Literal(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PathPattern::Literal(path) => path,
            PathPattern::Glob { pattern, .. } => pattern,
        }
    }

    /// Exact or glob match only
    fn matches_exactly(&self, normalized: &str) -> bool {
        match self {
            PathPattern::Literal(path) => path == normalized,
            PathPattern::Glob { matcher, .. } => matcher.is_match(normalized),
        }
    }

    /// Exact, glob, or the path lies under a literal directory
    fn matches_or_contains(&self, normalized: &str) -> bool {
        match self {
            PathPattern::Literal(path) => {
                path == normalized
                    || normalized
                        .strip_prefix(path.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            PathPattern::Glob { matcher, .. } => matcher.is_match(normalized),
        }
    }
}

/// One classified skip criterion
#[derive(Debug, Clone)]
pub enum SkipEntry {
    /// Skip a rule; everywhere when `scope` is `None`, else only in the listed files
    ClassSkip {
        symbol_name: String,
        scope: Option<Vec<PathPattern>>,
    },
    /// Skip a file or directory entirely
    PathSkip { pattern: PathPattern },
}

/// Forward slashes, no `./` segments, no trailing slash, absolute against `root`
pub fn normalize_path(raw: &str, root: &Utf8Path) -> String {
    let slashed = raw.trim().replace('\\', "/");

    let absolute = if slashed.starts_with('/') || slashed.starts_with('*') || has_drive_prefix(&slashed) {
        slashed
    } else {
        format!("{}/{}", root.as_str().replace('\\', "/").trim_end_matches('/'), slashed)
    };

    let mut segments: Vec<&str> = Vec::new();
    for (i, segment) in absolute.split('/').enumerate() {
        if segment == "." || (segment.is_empty() && i > 0) {
            continue;
        }
        segments.push(segment);
    }

    let joined = segments.join("/");
    if joined.is_empty() { "/".to_string() } else { joined }
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Resolved skip criteria
#[derive(Debug, Clone, Default)]
pub struct SkipPolicy {
    entries: Vec<SkipEntry>,
    root: Utf8PathBuf,
}

impl SkipPolicy {
    /// Classify the raw criteria.
    ///
    /// - positional glob (`*`) → `PathSkip`, always registered
    /// - positional literal → `PathSkip`, only if the path exists on disk
    /// - key with null → `ClassSkip { scope: None }` if `lookup` knows the class,
    ///   silently dropped otherwise
    /// - key with path(s) → `ClassSkip { scope: Some(..) }`
    ///
    /// Invalid globs are reported together as one [`ConfigurationError`].
    pub fn resolve(
        criteria: &[SkipCriterion],
        lookup: &dyn ClassLookup,
        root: &Utf8Path,
    ) -> Result<Self, ConfigurationError> {
        let mut entries = Vec::new();
        let mut invalid = Vec::new();

        for criterion in criteria {
            match criterion {
                SkipCriterion::Path(raw) => {
                    if !raw.contains('*') {
                        let normalized = normalize_path(raw, root);
                        if !Utf8Path::new(&normalized).exists() {
                            tracing::debug!("Skip path does not exist, ignoring: {}", raw);
                            continue;
                        }
                    }

                    match PathPattern::compile(raw, root) {
                        Ok(pattern) => entries.push(SkipEntry::PathSkip { pattern }),
                        Err(e) => invalid.push(e),
                    }
                }
                SkipCriterion::Keyed(map) => {
                    for (symbol, scope) in map {
                        match scope {
                            None => {
                                if !lookup.has_class(symbol) {
                                    tracing::debug!("Unknown skipped class, ignoring: {}", symbol);
                                    continue;
                                }
                                entries.push(SkipEntry::ClassSkip {
                                    symbol_name: symbol.clone(),
                                    scope: None,
                                });
                            }
                            Some(scope) => {
                                let mut patterns = Vec::new();
                                for raw in scope.clone().into_paths() {
                                    match PathPattern::compile(&raw, root) {
                                        Ok(pattern) => patterns.push(pattern),
                                        Err(e) => invalid.push(e),
                                    }
                                }
                                entries.push(SkipEntry::ClassSkip {
                                    symbol_name: symbol.clone(),
                                    scope: Some(patterns),
                                });
                            }
                        }
                    }
                }
            }
        }

        if !invalid.is_empty() {
            return Err(ConfigurationError::InvalidSkipPatterns(invalid));
        }

        tracing::debug!("Resolved {} skip entries", entries.len());

        Ok(Self {
            entries,
            root: root.to_path_buf(),
        })
    }

    pub fn entries(&self) -> &[SkipEntry] {
        &self.entries
    }

    /// Whether the whole file is excluded from processing
    pub fn is_skipped_path(&self, path: &Utf8Path) -> bool {
        let normalized = normalize_path(path.as_str(), &self.root);

        self.entries.iter().any(|entry| match entry {
            SkipEntry::PathSkip { pattern } => pattern.matches_or_contains(&normalized),
            SkipEntry::ClassSkip { .. } => false,
        })
    }

    /// Whether `symbol_name` (a rule) must not run on `path`
    pub fn is_skipped_symbol(&self, symbol_name: &str, path: &Utf8Path) -> bool {
        let normalized = normalize_path(path.as_str(), &self.root);

        self.entries.iter().any(|entry| match entry {
            SkipEntry::ClassSkip {
                symbol_name: skipped,
                scope,
            } if skipped == symbol_name => match scope {
                None => true,
                Some(patterns) => patterns.iter().any(|p| p.matches_exactly(&normalized)),
            },
            _ => false,
        })
    }

    /// Rules skipped everywhere, in configuration order
    pub fn globally_skipped_symbols(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                SkipEntry::ClassSkip {
                    symbol_name,
                    scope: None,
                } => Some(symbol_name.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Memoizes the resolved [`SkipPolicy`] for the process lifetime.
///
/// The memo is only dropped by [`clear`](Self::clear). With memoization
/// disabled every call resolves again, which is what tests want.
#[derive(Debug)]
pub struct SkipResolver {
    memoize: bool,
    resolved: RwLock<Option<Arc<SkipPolicy>>>,
}

impl SkipResolver {
    pub fn new() -> Self {
        Self {
            memoize: true,
            resolved: RwLock::new(None),
        }
    }

    pub fn without_memoization() -> Self {
        Self {
            memoize: false,
            resolved: RwLock::new(None),
        }
    }

    pub fn resolve(
        &self,
        criteria: &[SkipCriterion],
        lookup: &dyn ClassLookup,
        root: &Utf8Path,
    ) -> Result<Arc<SkipPolicy>, ConfigurationError> {
        if self.memoize {
            let cached = self.resolved.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(policy) = cached.as_ref() {
                return Ok(Arc::clone(policy));
            }
        }

        let policy = Arc::new(SkipPolicy::resolve(criteria, lookup, root)?);

        if self.memoize {
            let mut cached = self.resolved.write().unwrap_or_else(PoisonError::into_inner);
            *cached = Some(Arc::clone(&policy));
        }

        Ok(policy)
    }

    pub fn clear(&self) {
        let mut cached = self.resolved.write().unwrap_or_else(PoisonError::into_inner);
        *cached = None;
    }
}

impl Default for SkipResolver {
    fn default() -> Self {
        Self::new()
    }
}
