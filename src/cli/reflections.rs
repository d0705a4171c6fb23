//! Reflections command for Vigil.
//!
//! Lists recent reflection records from the reflection log.

use serde::{Deserialize, Serialize};

use crate::reflect::{ReflectionLog, ReflectionRecord};

/// Default number of records shown.
pub const DEFAULT_LIMIT: usize = 20;

/// Options for the reflections command.
#[derive(Debug, Clone, Default)]
pub struct ReflectionsOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// Only records of this task category.
    pub category: Option<String>,
    /// Maximum number of records.
    pub limit: Option<usize>,
}

/// Output format for the reflections command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionsOutput {
    pub success: bool,
    pub count: usize,
    pub records: Vec<ReflectionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReflectionsOutput {
    pub fn success(records: Vec<ReflectionRecord>) -> Self {
        Self {
            success: true,
            count: records.len(),
            records,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            count: 0,
            records: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// The reflections command implementation.
pub struct ReflectionsCommand {
    log: ReflectionLog,
}

impl ReflectionsCommand {
    pub fn new(log: ReflectionLog) -> Self {
        Self { log }
    }

    /// Run the reflections command.
    pub fn run(&self, options: &ReflectionsOptions) -> ReflectionsOutput {
        let limit = options.limit.unwrap_or(DEFAULT_LIMIT);
        let result = match &options.category {
            Some(category) => self.log.recent_for_category(category, limit),
            None => self.log.recent(limit),
        };
        match result {
            Ok(records) => ReflectionsOutput::success(records),
            Err(e) => ReflectionsOutput::failure(e.to_string()),
        }
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &ReflectionsOutput, options: &ReflectionsOptions) -> String {
        if options.quiet {
            return String::new();
        }

        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            self.format_human_readable(output)
        }
    }

    fn format_human_readable(&self, output: &ReflectionsOutput) -> String {
        if !output.success {
            return format!(
                "Failed to read reflections: {}\n",
                output.error.as_deref().unwrap_or("unknown error")
            );
        }
        if output.records.is_empty() {
            return "No reflections recorded.\n".to_string();
        }

        let mut lines = Vec::new();
        for r in &output.records {
            lines.push(format!(
                "{} {} [{}] {}: outcome {:.2}, process {:.2}, confidence {:.2} (reported {:.2})",
                r.reflected_at.format("%Y-%m-%d %H:%M"),
                r.interaction_id,
                r.task_category,
                r.status,
                r.outcome_score,
                r.process.score,
                r.assessed_confidence,
                r.reported_confidence
            ));
            if !r.issues.is_empty() {
                lines.push(format!("  issues: {}", r.issues.join(", ")));
            }
            if !r.recurring_issues.is_empty() {
                lines.push(format!("  recurring: {}", r.recurring_issues.join(", ")));
            }
            if let Some(best) = r.alternatives.first() {
                lines.push(format!(
                    "  best alternative: {} ({:.2}, {})",
                    best.description, best.estimated_quality, best.source
                ));
            }
        }
        lines.push(String::new());
        lines.push(format!("{} reflection(s)", output.count));
        lines.join("\n") + "\n"
    }
}
