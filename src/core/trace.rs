//! Reasoning trace and candidate response types.
//!
//! These are the immutable inputs handed to Vigil by the external reasoning
//! engine. A trace is shared read-only (behind an `Arc`) by every detector
//! that runs during one assessment.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VigilError};

/// Task category used when the pipeline does not supply one.
pub const DEFAULT_TASK_CATEGORY: &str = "general";

/// Ordered record of the steps an agent took to produce a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningTrace {
    /// Steps in execution order.
    pub steps: Vec<ReasoningStep>,
    /// Confidence reported by the model for the final answer.
    pub reported_confidence: f64,
}

impl ReasoningTrace {
    /// Create a trace from steps and the model-reported confidence.
    pub fn new(steps: Vec<ReasoningStep>, reported_confidence: f64) -> Self {
        Self {
            steps,
            reported_confidence,
        }
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the trace has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Mean of the per-step confidences (0.0 for an empty trace).
    pub fn mean_step_confidence(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        self.steps.iter().map(|s| s.confidence).sum::<f64>() / self.steps.len() as f64
    }

    /// Lowest per-step confidence (0.0 for an empty trace).
    pub fn min_step_confidence(&self) -> f64 {
        self.steps
            .iter()
            .map(|s| s.confidence)
            .fold(None, |acc: Option<f64>, c| Some(acc.map_or(c, |a| a.min(c))))
            .unwrap_or(0.0)
    }

    /// Steps that gathered evidence from outside the model.
    pub fn evidence_steps(&self) -> impl Iterator<Item = &ReasoningStep> {
        self.steps.iter().filter(|s| s.method.is_evidential())
    }

    /// Steps that invoked a tool.
    pub fn tool_steps(&self) -> impl Iterator<Item = &ReasoningStep> {
        self.steps
            .iter()
            .filter(|s| s.method == ReasoningMethod::ToolCall || s.tool.is_some())
    }

    /// Whether any step invoked a tool.
    pub fn has_tool_steps(&self) -> bool {
        self.tool_steps().next().is_some()
    }

    /// The method used by most steps, ties broken by first occurrence.
    pub fn dominant_method(&self) -> Option<ReasoningMethod> {
        let mut counts: Vec<(ReasoningMethod, usize)> = Vec::new();
        for step in &self.steps {
            match counts.iter_mut().find(|(m, _)| *m == step.method) {
                Some((_, n)) => *n += 1,
                None => counts.push((step.method, 1)),
            }
        }
        let mut best: Option<(ReasoningMethod, usize)> = None;
        for (method, n) in counts {
            if best.map_or(true, |(_, b)| n > b) {
                best = Some((method, n));
            }
        }
        best.map(|(m, _)| m)
    }

    /// The final step's output, if any.
    pub fn conclusion(&self) -> Option<&str> {
        self.steps.last().map(|s| s.output.as_str())
    }

    /// Validate the trace before assessment.
    ///
    /// A malformed trace is fatal for the assessment.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(VigilError::inconsistent_trace("trace has no steps"));
        }
        if !is_unit(self.reported_confidence) {
            return Err(VigilError::inconsistent_trace(format!(
                "reported confidence {} is outside [0, 1]",
                self.reported_confidence
            )));
        }

        for (position, step) in self.steps.iter().enumerate() {
            if step.index != position {
                return Err(VigilError::inconsistent_trace(format!(
                    "step at position {} carries index {}",
                    position, step.index
                )));
            }
            if !is_unit(step.confidence) {
                return Err(VigilError::inconsistent_trace(format!(
                    "step {} confidence {} is outside [0, 1]",
                    step.index, step.confidence
                )));
            }
            if let Some(alt) = step.alternatives.iter().find(|a| !is_unit(a.confidence)) {
                return Err(VigilError::inconsistent_trace(format!(
                    "step {} alternative '{}' has confidence {} outside [0, 1]",
                    step.index, alt.description, alt.confidence
                )));
            }
            if step.method == ReasoningMethod::ToolCall && step.tool.is_none() {
                return Err(VigilError::inconsistent_trace(format!(
                    "step {} is a tool call without an invocation record",
                    step.index
                )));
            }
        }

        Ok(())
    }
}

fn is_unit(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// One reasoning step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningStep {
    /// Position in the trace (0-based).
    pub index: usize,
    /// Context the step reasoned over.
    pub input: String,
    /// Reasoning method applied.
    pub method: ReasoningMethod,
    /// What the step produced.
    pub output: String,
    /// Confidence the engine assigned to this step.
    pub confidence: f64,
    /// Alternatives the step considered and rejected.
    #[serde(default)]
    pub alternatives: Vec<StepAlternative>,
    /// Tool invocation, for tool-call steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolInvocation>,
}

impl ReasoningStep {
    /// Create a step without alternatives or tool invocation.
    pub fn new(
        index: usize,
        input: impl Into<String>,
        method: ReasoningMethod,
        output: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            index,
            input: input.into(),
            method,
            output: output.into(),
            confidence,
            alternatives: Vec::new(),
            tool: None,
        }
    }

    /// Add an alternative the step considered.
    pub fn with_alternative(mut self, description: impl Into<String>, confidence: f64) -> Self {
        self.alternatives.push(StepAlternative {
            description: description.into(),
            confidence,
        });
        self
    }

    /// Attach a tool invocation.
    pub fn with_tool(mut self, tool: ToolInvocation) -> Self {
        self.tool = Some(tool);
        self
    }
}

/// Reasoning method applied by a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMethod {
    Deduction,
    Induction,
    Abduction,
    Analogy,
    Decomposition,
    Retrieval,
    ToolCall,
    Observation,
    ChainOfThought,
    /// A step added by a correction strategy.
    Revision,
}

impl ReasoningMethod {
    /// Whether the step brings in evidence from outside the model.
    pub fn is_evidential(&self) -> bool {
        matches!(
            self,
            ReasoningMethod::Retrieval | ReasoningMethod::ToolCall | ReasoningMethod::Observation
        )
    }

    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningMethod::Deduction => "deduction",
            ReasoningMethod::Induction => "induction",
            ReasoningMethod::Abduction => "abduction",
            ReasoningMethod::Analogy => "analogy",
            ReasoningMethod::Decomposition => "decomposition",
            ReasoningMethod::Retrieval => "retrieval",
            ReasoningMethod::ToolCall => "tool_call",
            ReasoningMethod::Observation => "observation",
            ReasoningMethod::ChainOfThought => "chain_of_thought",
            ReasoningMethod::Revision => "revision",
        }
    }
}

impl std::fmt::Display for ReasoningMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alternative a step considered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepAlternative {
    /// What the alternative would have concluded or done.
    pub description: String,
    /// Confidence the engine gave the alternative.
    pub confidence: f64,
}

/// A tool call recorded by the reasoning engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    /// Tool name.
    pub tool: String,
    /// Arguments passed to the tool.
    #[serde(default)]
    pub arguments: serde_json::Value,
    /// Whether the call succeeded.
    pub succeeded: bool,
    /// Error reported by the tool, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolInvocation {
    /// A successful invocation.
    pub fn ok(tool: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            arguments,
            succeeded: true,
            error: None,
        }
    }

    /// A failed invocation.
    pub fn failed(
        tool: impl Into<String>,
        arguments: serde_json::Value,
        error: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            arguments,
            succeeded: false,
            error: Some(error.into()),
        }
    }
}

/// The proposed output of the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateResponse {
    /// Response text (or serialized action).
    pub text: String,
    /// Metadata supplied by the pipeline.
    #[serde(default)]
    pub metadata: ResponseMetadata,
}

impl CandidateResponse {
    /// Create a response in the default category.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: ResponseMetadata::default(),
        }
    }

    /// Set the task category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.metadata.task_category = category.into();
        self
    }

    /// Add a domain tag.
    pub fn with_domain_tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.domain_tags.push(tag.into());
        self
    }

    /// Set the user the response is addressed to.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.metadata.user_id = Some(user_id.into());
        self
    }

    /// Copy of this response with different text and the same metadata.
    pub fn revised(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: self.metadata.clone(),
        }
    }

    /// Whether any domain tag matches (case-insensitive).
    pub fn has_domain(&self, domain: &str) -> bool {
        self.metadata
            .domain_tags
            .iter()
            .any(|t| t.eq_ignore_ascii_case(domain))
    }

    /// Validate the response before assessment.
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(VigilError::inconsistent_trace("candidate response is empty"));
        }
        Ok(())
    }
}

/// Metadata attached to a candidate response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMetadata {
    /// Task category used for calibration lookups.
    pub task_category: String,
    /// Domain tags (e.g. "medical", "hiring").
    #[serde(default)]
    pub domain_tags: Vec<String>,
    /// User the response is addressed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Default for ResponseMetadata {
    fn default() -> Self {
        Self {
            task_category: DEFAULT_TASK_CATEGORY.to_string(),
            domain_tags: Vec::new(),
            user_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(index: usize, method: ReasoningMethod, confidence: f64) -> ReasoningStep {
        ReasoningStep::new(index, "input", method, "output", confidence)
    }

    #[test]
    fn test_valid_trace() {
        let trace = ReasoningTrace::new(
            vec![
                step(0, ReasoningMethod::Retrieval, 0.8),
                step(1, ReasoningMethod::Deduction, 0.9),
            ],
            0.85,
        );
        assert!(trace.validate().is_ok());
        assert!((trace.mean_step_confidence() - 0.85).abs() < 1e-9);
        assert!((trace.min_step_confidence() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_empty_trace_rejected() {
        let trace = ReasoningTrace::new(Vec::new(), 0.9);
        let err = trace.validate().unwrap_err();
        assert!(matches!(err, VigilError::InconsistentTrace { .. }));
    }

    #[test]
    fn test_out_of_order_indices_rejected() {
        let trace = ReasoningTrace::new(
            vec![
                step(0, ReasoningMethod::Deduction, 0.8),
                step(2, ReasoningMethod::Deduction, 0.8),
            ],
            0.8,
        );
        assert!(trace.validate().is_err());
    }

    #[test]
    fn test_confidence_out_of_range_rejected() {
        let trace = ReasoningTrace::new(vec![step(0, ReasoningMethod::Deduction, 1.4)], 0.8);
        assert!(trace.validate().is_err());

        let trace = ReasoningTrace::new(vec![step(0, ReasoningMethod::Deduction, 0.4)], f64::NAN);
        assert!(trace.validate().is_err());
    }

    #[test]
    fn test_tool_call_without_invocation_rejected() {
        let trace = ReasoningTrace::new(vec![step(0, ReasoningMethod::ToolCall, 0.8)], 0.8);
        assert!(trace.validate().is_err());

        let trace = ReasoningTrace::new(
            vec![step(0, ReasoningMethod::ToolCall, 0.8)
                .with_tool(ToolInvocation::ok("search", json!({"q": "paris"})))],
            0.8,
        );
        assert!(trace.validate().is_ok());
        assert!(trace.has_tool_steps());
    }

    #[test]
    fn test_dominant_method() {
        let trace = ReasoningTrace::new(
            vec![
                step(0, ReasoningMethod::Retrieval, 0.8),
                step(1, ReasoningMethod::Deduction, 0.8),
                step(2, ReasoningMethod::Deduction, 0.8),
            ],
            0.8,
        );
        assert_eq!(trace.dominant_method(), Some(ReasoningMethod::Deduction));
    }

    #[test]
    fn test_empty_response_rejected() {
        assert!(CandidateResponse::new("   ").validate().is_err());
        assert!(CandidateResponse::new("Paris").validate().is_ok());
    }

    #[test]
    fn test_response_builders() {
        let response = CandidateResponse::new("text")
            .with_category("travel")
            .with_domain_tag("Booking")
            .with_user("u-1");
        assert_eq!(response.metadata.task_category, "travel");
        assert!(response.has_domain("booking"));
        assert_eq!(response.metadata.user_id.as_deref(), Some("u-1"));

        let revised = response.revised("other");
        assert_eq!(revised.text, "other");
        assert_eq!(revised.metadata, response.metadata);
    }

    #[test]
    fn test_trace_deserializes_with_defaults() {
        let json = r#"{
            "reported_confidence": 0.7,
            "steps": [
                {"index": 0, "input": "q", "method": "chain_of_thought", "output": "a", "confidence": 0.7}
            ]
        }"#;
        let trace: ReasoningTrace = serde_json::from_str(json).unwrap();
        assert_eq!(trace.steps[0].method, ReasoningMethod::ChainOfThought);
        assert!(trace.steps[0].alternatives.is_empty());
        assert!(trace.steps[0].tool.is_none());
    }
}
