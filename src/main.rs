//! Vigil - meta-cognitive self-monitoring for agent pipelines
//!
//! CLI entry point with global panic handler.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use vigil::calibration::{CalibrationStore, FileCalibrationStore, MemoryCalibrationStore};
use vigil::config::{event_log_path, vigil_home, Config};
use vigil::error::{exit_codes, FailOpen};
use vigil::events::EventLog;
use vigil::monitor::Monitor;
use vigil::reflect::ReflectionLog;

/// How long `assess` waits for queued reflection before exiting.
const REFLECTION_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// CLI Definition
// =============================================================================

/// Vigil - meta-cognitive self-monitoring for agent pipelines
#[derive(Parser)]
#[command(name = "vigil")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// [Pipeline] Assess one trace and candidate response (JSON)
    Assess {
        /// Read the request from a file instead of stdin
        #[arg(long, short)]
        input: Option<PathBuf>,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
        /// Defer the interaction if it takes longer than this
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// [User] Show calibration curves
    Calibration {
        /// Show one category with its bins
        #[arg(long, short)]
        category: Option<String>,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// [User] Show recent reflection records
    Reflections {
        /// Only records of this task category
        #[arg(long, short)]
        category: Option<String>,
        /// Maximum number of records
        #[arg(long, short)]
        limit: Option<usize>,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// [User] Initialize Vigil configuration
    Init {
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
        /// Force overwrite existing files
        #[arg(long, short)]
        force: bool,
    },
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> ExitCode {
    setup_panic_handler();
    setup_logging();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("vigil error: {}", e);
            ExitCode::from(exit_codes::ERROR as u8)
        }
    }
}

/// Set up the global panic handler.
///
/// On panic, logs to ~/.vigil/crash.log and exits with the crash code.
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("vigil panic: {}", info);

        if let Some(home) = vigil_home() {
            let crash_log = home.join("crash.log");
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&crash_log)
            {
                let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
                let _ = writeln!(file, "[{}] {}", timestamp, info);
            }
        }

        std::process::exit(exit_codes::CRASH);
    }));
}

/// Log to stderr, filtered by `VIGIL_LOG` (default `warn`).
fn setup_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("VIGIL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
}

/// Run the CLI and return the exit code.
fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;

    match cli.command {
        Commands::Assess {
            input,
            json,
            quiet,
            timeout_ms,
        } => run_assess(input.as_deref(), json, quiet, timeout_ms, &cwd),
        Commands::Calibration {
            category,
            json,
            quiet,
        } => run_calibration(category, json, quiet, &cwd),
        Commands::Reflections {
            category,
            limit,
            json,
            quiet,
        } => run_reflections(category, limit, json, quiet),
        Commands::Init { json, quiet, force } => run_init(json, quiet, force, &cwd),
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

fn success_to_exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::from(exit_codes::DELIVER as u8)
    } else {
        ExitCode::from(exit_codes::ERROR as u8)
    }
}

/// File-backed calibration, falling back to memory when the home directory
/// is unusable.
fn open_calibration(config: &Config) -> Arc<dyn CalibrationStore> {
    let window = config.calibration.window as usize;
    FileCalibrationStore::new(window)
        .map(|s| Arc::new(s) as Arc<dyn CalibrationStore>)
        .fail_open_with(
            "opening calibration store",
            Arc::new(MemoryCalibrationStore::new(window)),
        )
}

fn run_assess(
    input: Option<&Path>,
    json: bool,
    quiet: bool,
    timeout_ms: Option<u64>,
    cwd: &Path,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    use vigil::cli::assess::{AssessCommand, AssessOptions};

    let raw = match input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let config = Config::load_from_cwd(cwd);
    let calibration = open_calibration(&config);
    let mut monitor = Monitor::new(config, calibration);
    if let Some(path) = event_log_path() {
        monitor = monitor.with_events(Arc::new(EventLog::new(path)));
    }
    let monitor = match ReflectionLog::open_default() {
        Ok(log) => monitor.with_reflection(Arc::new(log))?,
        Err(e) => {
            tracing::warn!("reflection disabled: {}", e);
            monitor
        }
    };

    let cmd = AssessCommand::new(&monitor);
    let options = AssessOptions {
        json,
        quiet,
        timeout_ms,
    };
    let output = cmd.run(&raw, &options);
    let formatted = cmd.format_output(&output, &options);

    if !formatted.is_empty() {
        println!("{}", formatted);
    }

    if !monitor.flush_reflections(REFLECTION_FLUSH_TIMEOUT) {
        tracing::warn!("reflection still pending at exit");
    }
    monitor.shutdown();

    Ok(ExitCode::from(output.exit_code() as u8))
}

fn run_calibration(
    category: Option<String>,
    json: bool,
    quiet: bool,
    cwd: &Path,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    use vigil::cli::calibration::{CalibrationCommand, CalibrationOptions};

    let config = Config::load_from_cwd(cwd);
    let cmd = CalibrationCommand::new(open_calibration(&config));
    let options = CalibrationOptions {
        json,
        quiet,
        category,
    };

    let output = cmd.run(&options);
    let formatted = cmd.format_output(&output, &options);

    if !formatted.is_empty() {
        println!("{}", formatted);
    }

    Ok(success_to_exit_code(output.success))
}

fn run_reflections(
    category: Option<String>,
    limit: Option<usize>,
    json: bool,
    quiet: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    use vigil::cli::reflections::{ReflectionsCommand, ReflectionsOptions};

    let cmd = ReflectionsCommand::new(ReflectionLog::open_default()?);
    let options = ReflectionsOptions {
        json,
        quiet,
        category,
        limit,
    };

    let output = cmd.run(&options);
    let formatted = cmd.format_output(&output, &options);

    if !formatted.is_empty() {
        println!("{}", formatted);
    }

    Ok(success_to_exit_code(output.success))
}

fn run_init(
    json: bool,
    quiet: bool,
    force: bool,
    cwd: &Path,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    use vigil::cli::init::{InitCommand, InitOptions};

    let cmd = InitCommand::new(cwd);
    let options = InitOptions { json, quiet, force };

    let output = cmd.run(&options);
    let formatted = cmd.format_output(&output, &options);

    if !formatted.is_empty() {
        println!("{}", formatted);
    }

    Ok(success_to_exit_code(output.success))
}
