use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Project configuration from conductor.yaml
///
/// This is the raw, serialized shape. It is turned into a validated
/// [`RunConfig`](crate::config::RunConfig) by the
/// [`ConfigBuilder`](crate::config::ConfigBuilder).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub paths: Vec<String>,

    #[serde(default)]
    pub parallel: ParallelSettings,

    #[serde(default)]
    pub skip: Vec<SkipCriterion>,

    #[serde(default)]
    pub rules: Vec<RuleSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_directory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_class: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_extensions: Vec<String>,
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelSettings {
    #[serde(default = "default_parallel_enabled")]
    pub enabled: bool,

    #[serde(default = "default_job_timeout_seconds")]
    pub job_timeout_seconds: u64,

    #[serde(default = "default_max_processes")]
    pub max_processes: usize,

    #[serde(default = "default_job_size")]
    pub job_size: usize,
}

impl Default for ParallelSettings {
    fn default() -> Self {
        Self {
            enabled: default_parallel_enabled(),
            job_timeout_seconds: default_job_timeout_seconds(),
            max_processes: default_max_processes(),
            job_size: default_job_size(),
        }
    }
}

fn default_parallel_enabled() -> bool {
    true
}

fn default_job_timeout_seconds() -> u64 {
    120
}

fn default_max_processes() -> usize {
    16
}

fn default_job_size() -> usize {
    20
}

/// One element of the heterogeneous `skip` list.
///
/// ```yaml
/// skip:
///   - src/Legacy                 # positional: path or glob
///   - "*/Fixture/*"
///   - rename-class: ~            # keyed, null: skip rule everywhere
///   - trim-trailing-whitespace:  # keyed, paths: skip rule in these files
///       - src/Generated.php
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SkipCriterion {
    Path(String),
    Keyed(IndexMap<String, Option<SkipScope>>),
}

impl SkipCriterion {
    pub fn path(path: impl Into<String>) -> Self {
        SkipCriterion::Path(path.into())
    }

    pub fn symbol(symbol: impl Into<String>) -> Self {
        let mut map = IndexMap::new();
        map.insert(symbol.into(), None);
        SkipCriterion::Keyed(map)
    }

    pub fn symbol_in<I, S>(symbol: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = IndexMap::new();
        map.insert(
            symbol.into(),
            Some(SkipScope::Many(paths.into_iter().map(Into::into).collect())),
        );
        SkipCriterion::Keyed(map)
    }
}

/// File scope of a keyed skip entry: one path or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SkipScope {
    One(String),
    Many(Vec<String>),
}

impl SkipScope {
    pub fn into_paths(self) -> Vec<String> {
        match self {
            SkipScope::One(path) => vec![path],
            SkipScope::Many(paths) => paths,
        }
    }
}

/// A rule reference in conductor.yaml: a bare name, or a name with configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleSpec {
    Name(String),
    Configured(IndexMap<String, IndexMap<String, String>>),
}
