mod builder;

pub use builder::{ConfigBuilder, RunConfig};

use crate::models::FileConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use thiserror::Error;

/// Default configuration file name, looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "conductor.yaml";

/// Fatal configuration problems, raised before any file is processed.
///
/// Each message names every offending entry, not just the first one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Following rules are registered twice: {}", .0.join(", "))]
    DuplicateRules(Vec<String>),

    #[error("Unknown rules: {}", .0.join(", "))]
    UnknownRules(Vec<String>),

    #[error("Unknown cache class \"{0}\", expected \"file\" or \"memory\"")]
    UnknownCacheClass(String),

    #[error("Invalid skip patterns: {}", .0.join(", "))]
    InvalidSkipPatterns(Vec<String>),

    #[error("Invalid configuration for rule {rule}: {message}")]
    InvalidRuleConfiguration { rule: String, message: String },

    #[error("Invalid parallel settings: {0}")]
    InvalidParallelSettings(String),

    #[error("Path is not valid UTF-8: {0}")]
    InvalidPath(String),

    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ConfigurationError>),
}

/// Loads and saves the project configuration file.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    pub fn new<P: AsRef<Utf8Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    /// Manager for `conductor.yaml` inside `dir`
    pub fn in_directory<P: AsRef<Utf8Path>>(dir: P) -> Self {
        Self::new(dir.as_ref().join(CONFIG_FILE_NAME))
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }

    /// Directory relative paths in the configuration are resolved against
    pub fn project_root(&self) -> Utf8PathBuf {
        match self.config_path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
            _ => Utf8PathBuf::from("."),
        }
    }

    /// Load the configuration file.
    ///
    /// # Returns
    /// The parsed FileConfig, or defaults if the file doesn't exist
    pub fn load(&self) -> Result<FileConfig> {
        if !self.config_path.exists() {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                self.config_path
            );
            return Ok(FileConfig::default());
        }

        let file_contents = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config: {}", self.config_path))?;

        let config: FileConfig = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse config: {}", self.config_path))?;

        tracing::info!("Loaded config from {}", self.config_path);
        Ok(config)
    }

    pub fn save(&self, config: &FileConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.config_path))?;

        tracing::info!("Saved config to {}", self.config_path);
        Ok(())
    }

    /// Load the file into a builder rooted at the file's directory
    pub fn load_builder(&self) -> Result<ConfigBuilder> {
        let file_config = self.load()?;
        let mut builder = ConfigBuilder::from_file_config(&file_config)?;
        builder.root(self.project_root());
        Ok(builder)
    }
}
