//! Init command for Vigil.
//!
//! Scaffolds the project configuration and the user-level state
//! directories.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::vigil_home;

/// Options for the init command.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// Force overwrite existing files.
    pub force: bool,
}

/// Output format for the init command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitOutput {
    /// Whether initialization was successful.
    pub success: bool,
    /// Files and directories created.
    pub created: Vec<String>,
    /// Files that already existed (skipped).
    pub skipped: Vec<String>,
    /// Error message if initialization failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InitOutput {
    /// Create a successful output.
    pub fn success(created: Vec<String>, skipped: Vec<String>) -> Self {
        Self {
            success: true,
            created,
            skipped,
            error: None,
        }
    }

    /// Create a failed output, keeping what was created before the failure.
    pub fn failure(error: impl Into<String>, created: Vec<String>, skipped: Vec<String>) -> Self {
        Self {
            success: false,
            created,
            skipped,
            error: Some(error.into()),
        }
    }
}

/// Default config.toml content.
const DEFAULT_CONFIG: &str = r#"# Vigil Configuration
#
# Project-level settings for the meta-cognitive monitor. Environment
# variables (VIGIL_*) override these values.

[confidence]
# Below this confidence, self-correction is attempted
threshold = 0.7
# Calibration samples a category needs before its history is trusted
min_history_samples = 20
calibration_timeout_ms = 250

[confidence.weights]
reported = 0.3
coherence = 0.3
historical = 0.2
uncertainty = 0.2

[uncertainty]
signal_threshold = 0.3
strategy_budget_ms = 500

[safety]
# Minimum severity that forces escalation: low, medium, high, critical
escalation_severity = "high"
detector_timeout_ms = 1000

[correction]
max_attempts = 2
lookup_timeout_ms = 2000

[escalation]
confidence_floor = 0.5
matching_timeout_ms = 500
always_escalate_domains = []
always_escalate_users = []

# [[escalation.experts]]
# id = "fairness-desk"
# name = "Fairness review"
# expertise = ["fairness"]
# response_time_minutes = 30

[reflection]
# immediate, batched or sampled
policy = "immediate"
batch_size = 10
sample_rate = 0.2
pattern_window = 50
recurring_threshold = 3

[calibration]
window = 500
"#;

/// The init command implementation.
pub struct InitCommand {
    cwd: PathBuf,
    home: Option<PathBuf>,
}

impl InitCommand {
    /// Create a new init command using the default Vigil home.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            home: vigil_home(),
        }
    }

    /// Use a specific Vigil home.
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Run the init command.
    pub fn run(&self, options: &InitOptions) -> InitOutput {
        let mut created = Vec::new();
        let mut skipped = Vec::new();

        let vigil_dir = self.cwd.join(".vigil");
        let config_path = vigil_dir.join("config.toml");
        let mut steps: Vec<(PathBuf, Option<&str>)> = vec![
            (vigil_dir, None),
            (config_path, Some(DEFAULT_CONFIG)),
        ];
        if let Some(home) = &self.home {
            steps.push((home.clone(), None));
            steps.push((home.join("calibration"), None));
        }

        for (path, content) in &steps {
            let result = match content {
                Some(content) => ensure_file(path, content, options.force),
                None => ensure_dir(path),
            };
            match result {
                Ok(true) => created.push(path.display().to_string()),
                Ok(false) => skipped.push(path.display().to_string()),
                Err(e) => return InitOutput::failure(e, created, skipped),
            }
        }

        InitOutput::success(created, skipped)
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &InitOutput, options: &InitOptions) -> String {
        if options.quiet {
            return String::new();
        }

        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            self.format_human_readable(output)
        }
    }

    /// Format output as human-readable text.
    fn format_human_readable(&self, output: &InitOutput) -> String {
        let mut lines = Vec::new();
        let section = |lines: &mut Vec<String>, title: &str, paths: &[String]| {
            if !paths.is_empty() {
                lines.push(title.to_string());
                lines.extend(paths.iter().map(|p| format!("  {}", p)));
            }
        };

        if !output.success {
            lines.push(format!(
                "Init failed: {}",
                output.error.as_deref().unwrap_or("unknown error")
            ));
            section(&mut lines, "Partially created before failure:", &output.created);
            section(&mut lines, "Already existed (skipped):", &output.skipped);
            return lines.join("\n") + "\n";
        }

        if output.created.is_empty() {
            return "Vigil already initialized.\n".to_string();
        }

        section(&mut lines, "Created:", &output.created);
        section(&mut lines, "Already exists (skipped):", &output.skipped);
        lines.push(String::new());
        lines.push("Vigil initialized successfully.".to_string());

        lines.join("\n") + "\n"
    }
}

/// Returns Ok(true) if created, Ok(false) if it already exists.
fn ensure_dir(path: &Path) -> Result<bool, String> {
    if path.exists() {
        if path.is_dir() {
            return Ok(false);
        }
        return Err(format!("{} exists but is not a directory", path.display()));
    }

    fs::create_dir_all(path)
        .map_err(|e| format!("Failed to create directory {}: {}", path.display(), e))?;
    Ok(true)
}

/// Returns Ok(true) if written, Ok(false) if it already exists.
fn ensure_file(path: &Path, content: &str, force: bool) -> Result<bool, String> {
    if path.exists() && !force {
        return Ok(false);
    }

    fs::write(path, content)
        .map_err(|e| format!("Failed to write file {}: {}", path.display(), e))?;
    Ok(true)
}
