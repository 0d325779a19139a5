use super::ConfigurationError;
use crate::models::{FileConfig, ParallelSettings, RuleSpec, SkipCriterion};
use crate::rules::{Rule, RuleRegistry, builtin, find_duplicates};
use crate::services::cache::{CacheBackend, fingerprint_bytes};
use crate::services::scheduler::SchedulerSettings;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::sync::Arc;

const DEFAULT_CACHE_DIRECTORY: &str = "conductor_cached_files";
const DEFAULT_FILE_EXTENSION: &str = "php";

/// Programmatic configuration.
///
/// Every setter returns `&mut Self` so shared fragments can be composed with
/// [`import`](Self::import):
///
/// ```ignore
/// fn legacy_set(config: &mut ConfigBuilder) {
///     config.rule(Arc::new(TrimTrailingWhitespaceRule));
/// }
///
/// let run = ConfigBuilder::new()
///     .paths(["src", "tests"])
///     .import(legacy_set)
///     .parallel(60, 8, 10)
///     .build()?;
/// ```
#[derive(Default)]
pub struct ConfigBuilder {
    root: Option<Utf8PathBuf>,
    paths: Vec<String>,
    parallel: ParallelSettings,
    skip: Vec<SkipCriterion>,
    rules: Vec<RuleEntry>,
    cache_directory: Option<String>,
    cache_class: Option<String>,
    file_extensions: Option<Vec<String>>,
}

/// A registered rule: a ready instance, or a built-in created at build time
enum RuleEntry {
    Instance(Arc<dyn Rule>),
    Configured {
        name: String,
        options: IndexMap<String, String>,
    },
}

impl RuleEntry {
    fn name(&self) -> &str {
        match self {
            RuleEntry::Instance(rule) => rule.name(),
            RuleEntry::Configured { name, .. } => name,
        }
    }
}

impl std::fmt::Debug for ConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigBuilder")
            .field("root", &self.root)
            .field("paths", &self.paths)
            .field("parallel", &self.parallel)
            .field("skip", &self.skip)
            .field("rules", &self.rules.iter().map(RuleEntry::name).collect::<Vec<_>>())
            .field("cache_directory", &self.cache_directory)
            .field("cache_class", &self.cache_class)
            .field("file_extensions", &self.file_extensions)
            .finish()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pre-filled from a parsed `conductor.yaml`.
    ///
    /// Rules are instantiated from the built-in catalogue. Unknown names and
    /// invalid rule configurations are all reported in one error; configured
    /// entries for the same rule are merged.
    pub fn from_file_config(config: &FileConfig) -> Result<Self, ConfigurationError> {
        let mut builder = Self::new();
        let mut unknown = Vec::new();
        let mut invalid = Vec::new();

        for spec in &config.rules {
            match spec {
                RuleSpec::Name(name) if builtin::is_builtin(name) => match builtin::create_rule(name, None) {
                    Ok(rule) => {
                        builder.rule(rule);
                    }
                    Err(e) => invalid.push(e),
                },
                RuleSpec::Name(name) => unknown.push(name.clone()),
                RuleSpec::Configured(map) => {
                    for (name, options) in map {
                        if !builtin::is_builtin(name) {
                            unknown.push(name.clone());
                            continue;
                        }
                        if let Err(e) = builtin::create_rule(name, Some(options)) {
                            invalid.push(e);
                            continue;
                        }
                        builder.rule_with_configuration(name.clone(), options.clone());
                    }
                }
            }
        }

        combine_errors(unknown, invalid)?;

        builder
            .paths(config.paths.iter().cloned())
            .skip(config.skip.iter().cloned());
        builder.parallel = config.parallel.clone();
        builder.cache_directory = config.cache_directory.clone();
        builder.cache_class = config.cache_class.clone();
        if !config.file_extensions.is_empty() {
            builder.file_extensions(config.file_extensions.iter().cloned());
        }

        Ok(builder)
    }

    /// Directory relative paths are resolved against; defaults to the working directory
    pub fn root(&mut self, root: impl Into<Utf8PathBuf>) -> &mut Self {
        self.root = Some(root.into());
        self
    }

    pub fn paths<I, S>(&mut self, paths: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Drop the paths given so far, e.g. when the command line names its own
    pub fn replace_paths<I, S>(&mut self, paths: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths.clear();
        self.paths(paths)
    }

    /// Apply a reusable configuration fragment
    pub fn import<F>(&mut self, fragment: F) -> &mut Self
    where
        F: FnOnce(&mut ConfigBuilder),
    {
        fragment(self);
        self
    }

    pub fn parallel(&mut self, timeout_seconds: u64, max_processes: usize, job_size: usize) -> &mut Self {
        self.parallel = ParallelSettings {
            enabled: true,
            job_timeout_seconds: timeout_seconds,
            max_processes,
            job_size,
        };
        self
    }

    pub fn disable_parallel(&mut self) -> &mut Self {
        self.parallel.enabled = false;
        self
    }

    pub fn skip<I>(&mut self, criteria: I) -> &mut Self
    where
        I: IntoIterator<Item = SkipCriterion>,
    {
        self.skip.extend(criteria);
        self
    }

    pub fn rule(&mut self, rule: Arc<dyn Rule>) -> &mut Self {
        self.rules.push(RuleEntry::Instance(rule));
        self
    }

    pub fn rules<I>(&mut self, rules: I) -> &mut Self
    where
        I: IntoIterator<Item = Arc<dyn Rule>>,
    {
        self.rules.extend(rules.into_iter().map(RuleEntry::Instance));
        self
    }

    /// Register a built-in rule by name with options.
    ///
    /// Calling this again for the same rule, e.g. from several imported
    /// fragments, merges the options; later keys win. The rule is created in
    /// [`build`](Self::build).
    pub fn rule_with_configuration(
        &mut self,
        name: impl Into<String>,
        options: IndexMap<String, String>,
    ) -> &mut Self {
        let name = name.into();
        let existing = self.rules.iter_mut().find_map(|entry| match entry {
            RuleEntry::Configured { name: registered, options } if *registered == name => Some(options),
            _ => None,
        });

        match existing {
            Some(existing) => existing.extend(options),
            None => self.rules.push(RuleEntry::Configured { name, options }),
        }
        self
    }

    pub fn cache_directory(&mut self, directory: impl Into<String>) -> &mut Self {
        self.cache_directory = Some(directory.into());
        self
    }

    pub fn cache_class(&mut self, class: impl Into<String>) -> &mut Self {
        self.cache_class = Some(class.into());
        self
    }

    pub fn file_extensions<I, S>(&mut self, extensions: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_extensions = Some(
            extensions
                .into_iter()
                .map(|e| e.into().trim().trim_start_matches('.').to_string())
                .collect(),
        );
        self
    }

    /// Validate everything and freeze it into a [`RunConfig`]
    pub fn build(&self) -> Result<RunConfig, ConfigurationError> {
        let duplicates = find_duplicates(self.rules.iter().map(RuleEntry::name));
        if !duplicates.is_empty() {
            return Err(ConfigurationError::DuplicateRules(duplicates));
        }

        let rules = self.instantiate_rules()?;

        if self.parallel.enabled {
            let mut problems = Vec::new();
            if self.parallel.job_timeout_seconds == 0 {
                problems.push("timeout must be greater than zero");
            }
            if self.parallel.max_processes == 0 {
                problems.push("max processes must be greater than zero");
            }
            if self.parallel.job_size == 0 {
                problems.push("job size must be greater than zero");
            }
            if !problems.is_empty() {
                return Err(ConfigurationError::InvalidParallelSettings(problems.join(", ")));
            }
        }

        let cache_backend = match &self.cache_class {
            Some(class) => class.parse()?,
            None => CacheBackend::default(),
        };

        let root = absolute_root(self.root.as_deref())?;

        let paths = self.paths.iter().map(|p| resolve_against(&root, p)).collect();

        let cache_directory = match &self.cache_directory {
            Some(directory) => resolve_against(&root, directory),
            None => utf8(std::env::temp_dir())?.join(DEFAULT_CACHE_DIRECTORY),
        };

        let file_extensions = self
            .file_extensions
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_FILE_EXTENSION.to_string()]);

        Ok(RunConfig {
            root,
            paths,
            parallel: self.parallel.clone(),
            skip: self.skip.clone(),
            rules: RuleRegistry::new(rules)?,
            cache_directory,
            cache_backend,
            file_extensions,
        })
    }
}

impl ConfigBuilder {
    fn instantiate_rules(&self) -> Result<Vec<Arc<dyn Rule>>, ConfigurationError> {
        let mut rules = Vec::with_capacity(self.rules.len());
        let mut unknown = Vec::new();
        let mut invalid = Vec::new();

        for entry in &self.rules {
            match entry {
                RuleEntry::Instance(rule) => rules.push(Arc::clone(rule)),
                RuleEntry::Configured { name, .. } if !builtin::is_builtin(name) => unknown.push(name.clone()),
                RuleEntry::Configured { name, options } => match builtin::create_rule(name, Some(options)) {
                    Ok(rule) => rules.push(rule),
                    Err(e) => invalid.push(e),
                },
            }
        }

        combine_errors(unknown, invalid)?;
        Ok(rules)
    }
}

/// One error naming every unknown rule and every invalid rule configuration
fn combine_errors(unknown: Vec<String>, mut errors: Vec<ConfigurationError>) -> Result<(), ConfigurationError> {
    if !unknown.is_empty() {
        errors.insert(0, ConfigurationError::UnknownRules(unknown));
    }

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ConfigurationError::Multiple(errors)),
    }
}

fn utf8(path: std::path::PathBuf) -> Result<Utf8PathBuf, ConfigurationError> {
    Utf8PathBuf::from_path_buf(path).map_err(|p| ConfigurationError::InvalidPath(p.display().to_string()))
}

fn absolute_root(root: Option<&Utf8Path>) -> Result<Utf8PathBuf, ConfigurationError> {
    let current_dir = || {
        std::env::current_dir()
            .map_err(|e| ConfigurationError::InvalidPath(e.to_string()))
            .and_then(utf8)
    };

    match root {
        Some(root) if root.is_absolute() => Ok(root.to_path_buf()),
        Some(root) => Ok(current_dir()?.join(root)),
        None => current_dir(),
    }
}

fn resolve_against(root: &Utf8Path, path: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Validated configuration of one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub root: Utf8PathBuf,
    pub paths: Vec<Utf8PathBuf>,
    pub parallel: ParallelSettings,
    pub skip: Vec<SkipCriterion>,
    pub rules: RuleRegistry,
    pub cache_directory: Utf8PathBuf,
    pub cache_backend: CacheBackend,
    pub file_extensions: Vec<String>,
}

impl RunConfig {
    /// Fingerprint of everything that influences the output of a file.
    ///
    /// Covers the crate version, rules in order with their configuration,
    /// skip criteria and file extensions.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::json!({
            "version": crate::VERSION,
            "rules": self.rules.fingerprint_input(),
            "skip": self.skip,
            "file_extensions": self.file_extensions,
        });

        fingerprint_bytes(canonical.to_string().as_bytes())
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings::from(&self.parallel)
    }

    /// Whether `path` has one of the configured extensions
    pub fn matches_extension(&self, path: &Utf8Path) -> bool {
        path.extension()
            .is_some_and(|ext| self.file_extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}
