// Conductor - parallel, cache-aware orchestration of source rewrite rules
//
// This is the library crate containing the processing pipeline and data structures.
// The binary crate (main.rs) provides the command line entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod rules;
pub mod services;

// Re-export commonly used types for convenience
pub use config::{ConfigBuilder, ConfigManager, ConfigurationError, RunConfig};
pub use models::{ExitStatus, FileConfig, FileDiff, ProcessResult, SystemError};
pub use rules::{Rule, RuleError, RuleRegistry};
pub use services::{ApplicationFileProcessor, FileContext, RunOptions};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
