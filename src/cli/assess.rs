//! Assess command for Vigil.
//!
//! Reads an assessment request as JSON, runs it through the monitor and
//! reports the outcome. The exit code follows the decision.

use serde::{Deserialize, Serialize};

use crate::core::{CancellationToken, Decision};
use crate::error::exit_codes;
use crate::monitor::{AssessmentOutcome, AssessmentRequest, Monitor};

/// Options for the assess command.
#[derive(Debug, Clone, Default)]
pub struct AssessOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// Abort the assessment after this many milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Output format for the assess command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessOutput {
    /// Whether the assessment ran.
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<AssessmentOutcome>,
    /// Error message if the assessment failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AssessOutput {
    pub fn success(outcome: AssessmentOutcome) -> Self {
        Self {
            success: true,
            outcome: Some(outcome),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            outcome: None,
            error: Some(error.into()),
        }
    }

    /// Process exit code for this output.
    pub fn exit_code(&self) -> i32 {
        match self.outcome.as_ref().map(|o| &o.decision) {
            None => exit_codes::ERROR,
            Some(Decision::Deliver { .. }) => exit_codes::DELIVER,
            Some(Decision::Escalate { .. } | Decision::BlockedPendingReview) => {
                exit_codes::ESCALATE
            }
            Some(Decision::Deferred) => exit_codes::ERROR,
        }
    }
}

/// The assess command implementation.
pub struct AssessCommand<'a> {
    monitor: &'a Monitor,
}

impl<'a> AssessCommand<'a> {
    pub fn new(monitor: &'a Monitor) -> Self {
        Self { monitor }
    }

    /// Run the assess command on a JSON request.
    pub fn run(&self, input: &str, options: &AssessOptions) -> AssessOutput {
        let request: AssessmentRequest = match serde_json::from_str(input) {
            Ok(r) => r,
            Err(e) => return AssessOutput::failure(format!("Invalid assessment request: {}", e)),
        };

        let cancel = match options.timeout_ms {
            Some(ms) => CancellationToken::with_timeout(std::time::Duration::from_millis(ms)),
            None => CancellationToken::new(),
        };

        match self.monitor.assess(request, &cancel) {
            Ok(outcome) => AssessOutput::success(outcome),
            Err(e) => AssessOutput::failure(e.to_string()),
        }
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &AssessOutput, options: &AssessOptions) -> String {
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
    fn format_human_readable(&self, output: &AssessOutput) -> String {
        let Some(outcome) = &output.outcome else {
            return format!(
                "Assessment failed: {}\n",
                output.error.as_deref().unwrap_or("unknown error")
            );
        };

        let mut lines = Vec::new();
        lines.push(format!(
            "Interaction {}: {} ({})",
            outcome.interaction_id,
            outcome.decision.name(),
            outcome.status
        ));
        lines.push(format!(
            "Confidence: {:.0}% [{}]",
            outcome.assessment.confidence * 100.0,
            outcome.assessment.reliability.as_str()
        ));
        lines.push(format!("Rationale: {}", outcome.assessment.rationale));

        if !outcome.assessment.signals.is_empty() {
            lines.push(String::new());
            lines.push("Uncertainty:".to_string());
            for signal in &outcome.assessment.signals {
                lines.push(format!(
                    "  {} {:.2}: {}",
                    signal.uncertainty_type,
                    signal.magnitude,
                    signal.evidence.join("; ")
                ));
            }
        }

        if !outcome.safety_issues.is_empty() {
            lines.push(String::new());
            lines.push("Safety:".to_string());
            for issue in &outcome.safety_issues {
                lines.push(format!(
                    "  [{}] {}: {}",
                    issue.severity,
                    issue.category,
                    issue.evidence.join("; ")
                ));
            }
        }

        if !outcome.corrections.is_empty() {
            lines.push(String::new());
            lines.push("Corrections:".to_string());
            for action in &outcome.corrections {
                lines.push(format!(
                    "  #{} {} for {}: {:.2} -> {:.2}{}",
                    action.attempt,
                    action.strategy,
                    action.trigger.kind,
                    action.confidence_before,
                    action.confidence_after,
                    if action.success { "" } else { " (kept original)" }
                ));
            }
        }

        match &outcome.decision {
            Decision::Deliver {
                disclosure: Some(text),
            } => {
                lines.push(String::new());
                lines.push(text.clone());
            }
            Decision::Escalate { expert_id } => {
                lines.push(String::new());
                lines.push(format!("Assigned to {}", expert_id));
            }
            _ => {}
        }
        if let Some(escalation) = &outcome.escalation {
            lines.push(format!(
                "Escalation: {} urgency, {} expertise, respond by {}",
                escalation.urgency,
                escalation.required_expertise,
                escalation.respond_by.format("%Y-%m-%d %H:%M UTC")
            ));
        }

        lines.push(String::new());
        lines.push(outcome.response.text.clone());

        lines.join("\n") + "\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::MemoryCalibrationStore;
    use crate::config::Config;
    use std::sync::Arc;

    const REQUEST: &str = r#"{
        "interaction_id": "int-1",
        "trace": {
            "steps": [{
                "index": 0,
                "input": "What is the capital of France?",
                "method": "retrieval",
                "output": "The capital of France is Paris.",
                "confidence": 0.9
            }],
            "reported_confidence": 0.9
        },
        "response": {
            "text": "The capital of France is Paris.",
            "metadata": {"task_category": "geography"}
        }
    }"#;

    fn monitor() -> Monitor {
        Monitor::new(Config::default(), Arc::new(MemoryCalibrationStore::default()))
    }

    #[test]
    fn test_assess_valid_request() {
        let monitor = monitor();
        let cmd = AssessCommand::new(&monitor);
        let output = cmd.run(REQUEST, &AssessOptions::default());

        assert!(output.success, "{:?}", output.error);
        let outcome = output.outcome.as_ref().unwrap();
        assert_eq!(outcome.interaction_id, "int-1");
        assert_eq!(output.exit_code(), exit_codes::DELIVER);

        let text = cmd.format_output(&output, &AssessOptions::default());
        assert!(text.contains("int-1: deliver"));
    }

    #[test]
    fn test_assess_invalid_json() {
        let monitor = monitor();
        let output = AssessCommand::new(&monitor).run("{not json", &AssessOptions::default());
        assert!(!output.success);
        assert!(output.error.unwrap().contains("Invalid assessment request"));
    }

    #[test]
    fn test_assess_inconsistent_trace() {
        let monitor = monitor();
        let input = r#"{"interaction_id":"x","trace":{"steps":[],"reported_confidence":0.5},"response":{"text":"hi","metadata":{"task_category":"general"}}}"#;
        let output = AssessCommand::new(&monitor).run(input, &AssessOptions::default());
        assert!(!output.success);
        assert_eq!(output.exit_code(), exit_codes::ERROR);
    }

    #[test]
    fn test_format_output_quiet_and_json() {
        let monitor = monitor();
        let cmd = AssessCommand::new(&monitor);
        let output = cmd.run(REQUEST, &AssessOptions::default());

        let quiet = AssessOptions {
            quiet: true,
            ..Default::default()
        };
        assert!(cmd.format_output(&output, &quiet).is_empty());

        let json = AssessOptions {
            json: true,
            ..Default::default()
        };
        assert!(cmd.format_output(&output, &json).contains("\"success\": true"));
    }
}
