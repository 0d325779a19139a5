//! Integration tests for ConfigManager and ConfigBuilder
//!
//! These tests verify:
//! - Loading conductor.yaml into a validated RunConfig
//! - Defaults when the file is missing
//! - Fatal configuration errors (duplicates, unknown rules, unknown cache class)
//! - Duplicate registration stops the run before any file is touched

use conductor::models::{FileConfig, SkipCriterion};
use conductor::rules::builtin::{RENAME_CLASS, TRIM_TRAILING_WHITESPACE, TrimTrailingWhitespaceRule};
use conductor::services::CacheBackend;
use conductor::{ConfigBuilder, ConfigManager, ConfigurationError};
use camino::Utf8PathBuf;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn create_test_project() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    (temp_dir, root)
}

#[test]
fn test_missing_config_builds_defaults() {
    let (_temp_dir, root) = create_test_project();
    let manager = ConfigManager::in_directory(&root);

    let config = manager.load_builder().unwrap().build().unwrap();

    assert!(config.rules.is_empty());
    assert!(config.parallel.enabled);
    assert_eq!(config.parallel.job_timeout_seconds, 120);
    assert_eq!(config.parallel.max_processes, 16);
    assert_eq!(config.parallel.job_size, 20);
    assert_eq!(config.cache_backend, CacheBackend::File);
    assert_eq!(config.file_extensions, vec!["php".to_string()]);
    assert_eq!(config.root, root);
}

#[test]
fn test_full_config_file() {
    let (_temp_dir, root) = create_test_project();
    fs::create_dir_all(root.join("src/Legacy")).unwrap();

    let yaml = r#"
paths:
  - src
parallel:
  enabled: true
  job_timeout_seconds: 30
  max_processes: 4
  job_size: 5
rules:
  - trim-trailing-whitespace
  - rename-class:
      'Old\Mailer': 'New\Mailer'
skip:
  - src/Legacy
  - "*/Fixture/*"
  - rename-class:
      - src/Generated.php
cache_directory: .cache
cache_class: memory
"#;
    fs::write(root.join("conductor.yaml"), yaml).unwrap();

    let config = ConfigManager::in_directory(&root)
        .load_builder()
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(config.paths, vec![root.join("src")]);
    assert_eq!(config.parallel.job_timeout_seconds, 30);
    assert_eq!(config.parallel.max_processes, 4);
    assert_eq!(config.parallel.job_size, 5);
    assert_eq!(config.rules.names(), vec![TRIM_TRAILING_WHITESPACE, RENAME_CLASS]);
    assert_eq!(config.skip.len(), 3);
    assert_eq!(config.cache_directory, root.join(".cache"));
    assert_eq!(config.cache_backend, CacheBackend::Memory);
}

#[test]
fn test_duplicate_rule_in_config_file() {
    let (_temp_dir, root) = create_test_project();
    fs::write(
        root.join("conductor.yaml"),
        "rules:\n  - trim-trailing-whitespace\n  - trim-trailing-whitespace\n",
    )
    .unwrap();

    let err = ConfigManager::in_directory(&root)
        .load_builder()
        .unwrap()
        .build()
        .unwrap_err();

    assert_eq!(
        err,
        ConfigurationError::DuplicateRules(vec![TRIM_TRAILING_WHITESPACE.to_string()])
    );
}

#[test]
fn test_unknown_rule_in_config_file() {
    let (_temp_dir, root) = create_test_project();
    fs::write(root.join("conductor.yaml"), "rules: [no-such-rule]\n").unwrap();

    let err = ConfigManager::in_directory(&root).load_builder().unwrap_err();
    assert!(err.to_string().contains("no-such-rule"));
}

#[test]
fn test_unknown_cache_class_in_config_file() {
    let (_temp_dir, root) = create_test_project();
    fs::write(root.join("conductor.yaml"), "cache_class: redis\n").unwrap();

    let err = ConfigManager::in_directory(&root)
        .load_builder()
        .unwrap()
        .build()
        .unwrap_err();

    assert_eq!(err, ConfigurationError::UnknownCacheClass("redis".to_string()));
}

#[test]
fn test_invalid_skip_glob_is_fatal() {
    let (_temp_dir, root) = create_test_project();
    let config = ConfigBuilder::new()
        .root(root.clone())
        .skip([SkipCriterion::path("src/[*.php"), SkipCriterion::path("lib/{a*")])
        .build()
        .unwrap();

    let app = conductor::ApplicationFileProcessor::new(config);
    let err = app.list_rules().unwrap_err();
    let message = err.to_string();

    assert!(message.contains("src/[*.php"));
    assert!(message.contains("lib/{a*"));
}

#[test]
fn test_save_and_reload_round_trip() {
    let (_temp_dir, root) = create_test_project();
    let manager = ConfigManager::in_directory(&root);

    let mut config = FileConfig::default();
    config.paths = vec!["src".to_string()];
    config.skip = vec![
        SkipCriterion::path("*/Fixture/*"),
        SkipCriterion::symbol_in(RENAME_CLASS, ["src/Generated.php"]),
    ];
    manager.save(&config).unwrap();

    let reloaded = manager.load().unwrap();
    assert_eq!(reloaded.paths, config.paths);
    assert_eq!(reloaded.skip, config.skip);
}

#[test]
fn test_duplicate_registration_processes_nothing() {
    let (_temp_dir, root) = create_test_project();
    fs::write(root.join("a.php"), "<?php  \n").unwrap();

    let result = ConfigBuilder::new()
        .root(root.clone())
        .rule(Arc::new(TrimTrailingWhitespaceRule))
        .rule(Arc::new(TrimTrailingWhitespaceRule))
        .build();

    assert!(matches!(result, Err(ConfigurationError::DuplicateRules(_))));
    assert_eq!(fs::read_to_string(root.join("a.php")).unwrap(), "<?php  \n");
}

#[test]
fn test_configured_rule_entries_merge() {
    let (_temp_dir, root) = create_test_project();
    let yaml = r#"
rules:
  - rename-class:
      'Old\Mailer': 'New\Mailer'
  - trim-trailing-whitespace
  - rename-class:
      'Old\Logger': 'New\Logger'
"#;
    fs::write(root.join("conductor.yaml"), yaml).unwrap();

    let config = ConfigManager::in_directory(&root)
        .load_builder()
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(config.rules.names(), vec![RENAME_CLASS, TRIM_TRAILING_WHITESPACE]);
    assert_eq!(
        config.rules.fingerprint_input()[0].1,
        "Old\\Mailer=New\\Mailer;Old\\Logger=New\\Logger"
    );
}
