//! Procedural uncertainty: malformed tool calls and repeated failures.

use std::collections::BTreeMap;

use crate::core::{CandidateResponse, ReasoningTrace};
use crate::detect::{noisy_or, Detection, UncertaintyStrategy, UncertaintyType};
use crate::error::Result;

const MALFORMED_WEIGHT: f64 = 0.5;
const UNRECOVERED_WEIGHT: f64 = 0.4;

/// Error fragments that point at a bad invocation rather than a bad tool.
const SCHEMA_ERRORS: &[&str] = &[
    "schema",
    "invalid argument",
    "missing required",
    "malformed",
    "unexpected argument",
    "type error",
    "validation",
];

/// Detects unreliable tool usage. Only runs when the trace used tools.
#[derive(Debug, Default)]
pub struct ProceduralStrategy;

impl ProceduralStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl UncertaintyStrategy for ProceduralStrategy {
    fn name(&self) -> &'static str {
        "procedural"
    }

    fn uncertainty_type(&self) -> UncertaintyType {
        UncertaintyType::Procedural
    }

    fn applies_to(&self, trace: &ReasoningTrace) -> bool {
        trace.has_tool_steps()
    }

    fn detect(
        &self,
        trace: &ReasoningTrace,
        _response: &CandidateResponse,
    ) -> Result<Option<Detection>> {
        let mut evidence = Vec::new();
        let mut components = Vec::new();
        let mut failures: BTreeMap<&str, Vec<usize>> = BTreeMap::new();

        for step in trace.tool_steps() {
            let Some(tool) = step.tool.as_ref() else {
                continue;
            };

            let name = tool.tool.trim();
            let bad_args = !(tool.arguments.is_object() || tool.arguments.is_null());
            let schema_error = tool.error.as_deref().is_some_and(|e| {
                let e = e.to_lowercase();
                SCHEMA_ERRORS.iter().any(|frag| e.contains(frag))
            });
            if name.is_empty() || bad_args || schema_error {
                let reason = if name.is_empty() {
                    "empty tool name".to_string()
                } else if bad_args {
                    "arguments are not an object".to_string()
                } else {
                    format!("rejected invocation: {}", tool.error.as_deref().unwrap_or(""))
                };
                evidence.push(format!("step {}: malformed call to '{}' ({})", step.index, name, reason));
                components.push(MALFORMED_WEIGHT);
            }

            if !tool.succeeded {
                failures.entry(name).or_default().push(step.index);
            }
        }

        for (name, failed_steps) in &failures {
            let recovered = trace.tool_steps().any(|s| {
                s.index > *failed_steps.last().unwrap_or(&0)
                    && s.tool
                        .as_ref()
                        .is_some_and(|t| t.tool.trim() == *name && t.succeeded)
            });

            if failed_steps.len() >= 2 {
                let weight = (0.6 + 0.1 * (failed_steps.len() as f64 - 2.0)).min(0.9);
                evidence.push(format!(
                    "'{}' failed {} times (steps {:?})",
                    name,
                    failed_steps.len(),
                    failed_steps
                ));
                components.push(weight);
            } else if !recovered {
                evidence.push(format!(
                    "'{}' failed at step {} and was never retried successfully",
                    name, failed_steps[0]
                ));
                components.push(UNRECOVERED_WEIGHT);
            }
        }

        if components.is_empty() {
            return Ok(None);
        }

        Ok(Some(Detection::new(
            noisy_or(components),
            evidence,
            "retry through a fallback action path that avoids the failing tool",
        )))
    }
}

/// Tools that failed anywhere in the trace, in first-failure order.
pub fn failed_tools(trace: &ReasoningTrace) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for step in trace.tool_steps() {
        if let Some(tool) = step.tool.as_ref().filter(|t| !t.succeeded) {
            let name = tool.tool.trim().to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ReasoningMethod, ReasoningStep, ToolInvocation};
    use crate::detect::test_support::{response, single_step};
    use serde_json::json;

    fn tool_step(index: usize, tool: ToolInvocation) -> ReasoningStep {
        ReasoningStep::new(index, "call", ReasoningMethod::ToolCall, "result", 0.7).with_tool(tool)
    }

    fn detect(steps: Vec<ReasoningStep>) -> Option<Detection> {
        let trace = ReasoningTrace::new(steps, 0.7);
        ProceduralStrategy::new()
            .detect(&trace, &response("done"))
            .unwrap()
    }

    #[test]
    fn test_not_applicable_without_tools() {
        assert!(!ProceduralStrategy::new().applies_to(&single_step("x", 0.9)));
    }

    #[test]
    fn test_successful_calls_no_signal() {
        let d = detect(vec![tool_step(0, ToolInvocation::ok("search", json!({"q": "rome"})))]);
        assert!(d.is_none());
    }

    #[test]
    fn test_malformed_arguments() {
        let d = detect(vec![tool_step(0, ToolInvocation::ok("search", json!("rome")))]).unwrap();
        assert!((d.magnitude - MALFORMED_WEIGHT).abs() < 1e-9);
        assert!(d.evidence[0].contains("not an object"));
    }

    #[test]
    fn test_schema_error_is_malformed() {
        let d = detect(vec![
            tool_step(
                0,
                ToolInvocation::failed("book", json!({}), "Missing required field 'date'"),
            ),
            tool_step(1, ToolInvocation::ok("book", json!({"date": "2024-05-01"}))),
        ])
        .unwrap();
        assert!(d.evidence.iter().any(|e| e.contains("malformed call to 'book'")));
        // Recovered by the later success
        assert!(!d.evidence.iter().any(|e| e.contains("never retried")));
    }

    #[test]
    fn test_repeated_failures() {
        let d = detect(vec![
            tool_step(0, ToolInvocation::failed("weather", json!({}), "timeout")),
            tool_step(1, ToolInvocation::failed("weather", json!({}), "timeout")),
            tool_step(2, ToolInvocation::failed("weather", json!({}), "timeout")),
        ])
        .unwrap();
        assert!((d.magnitude - 0.7).abs() < 1e-9);
        assert!(d.evidence[0].contains("failed 3 times"));
    }

    #[test]
    fn test_unrecovered_single_failure() {
        let d = detect(vec![tool_step(
            0,
            ToolInvocation::failed("weather", json!({}), "503 service unavailable"),
        )])
        .unwrap();
        assert!((d.magnitude - UNRECOVERED_WEIGHT).abs() < 1e-9);
    }

    #[test]
    fn test_failed_tools_listing() {
        let trace = ReasoningTrace::new(
            vec![
                tool_step(0, ToolInvocation::failed("a", json!({}), "x")),
                tool_step(1, ToolInvocation::ok("b", json!({}))),
                tool_step(2, ToolInvocation::failed("a", json!({}), "x")),
                tool_step(3, ToolInvocation::failed("c", json!({}), "x")),
            ],
            0.5,
        );
        assert_eq!(failed_tools(&trace), vec!["a".to_string(), "c".to_string()]);
    }
}
