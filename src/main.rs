//! Conductor - parallel, cache-aware orchestration of source rewrite rules
//!
//! Main entry point for the command line.
//!
//! # Commands
//!
//! - `conductor process [PATHS..]`: run every configured rule over the sources
//! - `conductor list-rules`: show loaded rules and the ones skipped everywhere
//!
//! # Exit codes
//!
//! - `0`: success (changes were applied, or a dry run found nothing)
//! - `1`: at least one error, or an invalid configuration
//! - `2`: dry run found changes
//!
//! # Execution Flow
//!
//! 1. Initialize logging (rotating file, console on stderr)
//! 2. Load `conductor.yaml` and build a validated [`RunConfig`]
//! 3. Run [`ApplicationFileProcessor`] on its own runtime and report the result

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use conductor::config::CONFIG_FILE_NAME;
use conductor::logging::{self, ConsoleFormat};
use conductor::services::{RunEvent, resolve_exit_status};
use conductor::{APP_NAME, ApplicationFileProcessor, ConfigManager, ExitStatus, ProcessResult, RunConfig, RunOptions, VERSION};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "conductor", version, about = "Apply source rewrite rules across a codebase")]
struct Cli {
    /// Configuration file
    #[arg(long, short = 'c', value_name = "FILE", default_value = CONFIG_FILE_NAME, global = true)]
    config: Utf8PathBuf,

    /// Directory for log files (defaults to a directory under the system temp dir)
    #[arg(long, value_name = "DIR", global = true)]
    log_dir: Option<Utf8PathBuf>,

    /// Console log lines as JSON
    #[arg(long, default_value_t = false, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the configured rules over the sources
    Process {
        /// Files or directories; overrides the configured paths
        paths: Vec<Utf8PathBuf>,

        /// Report changes without writing them; exits with 2 if there are any
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Debug logging, implies --clear-cache
        #[arg(long, default_value_t = false)]
        debug: bool,

        /// Forget which files were already processed
        #[arg(long, default_value_t = false)]
        clear_cache: bool,

        /// Process every file in this process, one after another
        #[arg(long, default_value_t = false)]
        no_parallel: bool,
    },

    /// List loaded rules
    ListRules {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(status) => ExitCode::from(status.code()),
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("[ERROR] {:#}", e);
            ExitCode::from(ExitStatus::Failure.code())
        }
    }
}

fn run(cli: Cli) -> Result<ExitStatus> {
    let debug = matches!(cli.command, Command::Process { debug: true, .. });
    let log_dir = match cli.log_dir {
        Some(dir) => dir,
        None => Utf8PathBuf::from_path_buf(std::env::temp_dir())
            .map_err(|p| anyhow::anyhow!("Temp directory is not valid UTF-8: {}", p.display()))?
            .join("conductor_logs"),
    };
    let console = if cli.log_json { ConsoleFormat::Json } else { ConsoleFormat::Text };

    // Held until exit so buffered log lines are flushed
    let _guard = logging::setup_logging_with_console(&log_dir, "conductor", debug, console)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let manager = ConfigManager::new(&cli.config);

    match cli.command {
        Command::Process {
            paths,
            dry_run,
            debug,
            clear_cache,
            no_parallel,
        } => {
            let config = load_config(&manager, &paths, no_parallel)?;
            let options = RunOptions {
                dry_run,
                clear_cache: clear_cache || debug,
            };
            process(config, options)
        }
        Command::ListRules { json } => {
            let config = load_config(&manager, &[], false)?;
            list_rules(config, json)?;
            Ok(ExitStatus::Success)
        }
    }
}

fn load_config(manager: &ConfigManager, paths: &[Utf8PathBuf], no_parallel: bool) -> Result<RunConfig> {
    let mut builder = manager.load_builder()?;

    if !paths.is_empty() {
        let current_dir = Utf8PathBuf::from_path_buf(std::env::current_dir()?)
            .map_err(|p| anyhow::anyhow!("Working directory is not valid UTF-8: {}", p.display()))?;
        builder.replace_paths(paths.iter().map(|p| absolute(&current_dir, p).into_string()));
    }

    if no_parallel {
        builder.disable_parallel();
    }

    let config = builder.build()?;
    tracing::info!(
        "Configuration: {} rules, parallel={}, cache={} at {}",
        config.rules.len(),
        config.parallel.enabled,
        config.cache_backend.as_str(),
        config.cache_directory
    );
    Ok(config)
}

fn absolute(base: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn process(config: RunConfig, options: RunOptions) -> Result<ExitStatus> {
    let app = ApplicationFileProcessor::new(config);
    let mut events = app.subscribe();

    std::thread::spawn(move || {
        while let Ok(event) = events.blocking_recv() {
            match event {
                RunEvent::JobCompleted { finished_jobs, total_jobs, .. } => {
                    tracing::info!("Progress: {}/{} jobs", finished_jobs, total_jobs);
                }
                RunEvent::Finished { .. } => break,
                other => tracing::debug!("{:?}", other),
            }
        }
    });

    let result = app.run_blocking(&options)?;

    report(&result);
    app.metrics().log_summary();

    let status = resolve_exit_status(&result, options.dry_run);
    tracing::info!("Finished with exit status {:?}", status);
    Ok(status)
}

fn report(result: &ProcessResult) {
    for diff in &result.file_diffs {
        println!(
            "{} ({} changed lines: {})",
            diff.file_path,
            diff.changed_line_count(),
            diff.applied_rules.join(", ")
        );
    }

    for error in &result.errors {
        eprintln!("[ERROR] {}", error);
    }

    println!(
        "{} files changed, {} errors",
        result.file_diffs.len(),
        result.errors.len()
    );
}

fn list_rules(config: RunConfig, json: bool) -> Result<()> {
    let app = ApplicationFileProcessor::new(config);
    let listing = app.list_rules()?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&listing).context("Failed to serialize rule listing")?
        );
        return Ok(());
    }

    println!("Loaded rules:");
    for rule in &listing.rules {
        if rule.description.is_empty() {
            println!("  {}", rule.name);
        } else {
            println!("  {} - {}", rule.name, rule.description);
        }
    }

    if !listing.skipped_rules.is_empty() {
        println!("Skipped rules:");
        for name in &listing.skipped_rules {
            println!("  {}", name);
        }
    }

    Ok(())
}
