//! Correction strategies, one per issue kind.

use std::sync::Arc;

use crate::core::ReasoningMethod;
use crate::correct::{CorrectionContext, CorrectionStrategy, IssueKind, Revision};
use crate::detect::logical::contradictions;
use crate::detect::procedural::failed_tools;
use crate::error::{Result, VigilError};
use crate::safety::privacy::redact;
use crate::util::{call_with_timeout, truncate};

/// Methods tried when the original reasoning strategy looks wrong.
pub const ALTERNATE_METHODS: &[ReasoningMethod] = &[
    ReasoningMethod::ChainOfThought,
    ReasoningMethod::Decomposition,
    ReasoningMethod::Analogy,
    ReasoningMethod::Retrieval,
];

fn regenerate(
    ctx: &CorrectionContext<'_>,
    strategy: &str,
    request: crate::correct::RegenerationRequest,
) -> Result<Revision> {
    let reasoner = ctx.require_reasoner(strategy)?;
    let method = request.method;
    let regen = reasoner.regenerate(&request)?;
    Ok(Revision {
        trace: regen.trace,
        response: regen.response,
        method,
    })
}

fn append(ctx: &CorrectionContext<'_>, text: &str, addition: &str) -> Revision {
    Revision {
        trace: ctx.trace.clone(),
        response: ctx.response.revised(format!("{}\n\n{}", text.trim_end(), addition)),
        method: None,
    }
}

// ============================================================================
// Local revisions
// ============================================================================

/// Adds a caveat for a medium safety concern, redacting personal data.
#[derive(Debug, Default)]
pub struct CaveatStrategy;

impl CaveatStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl CorrectionStrategy for CaveatStrategy {
    fn name(&self) -> &'static str {
        "caveat"
    }

    fn kind(&self) -> IssueKind {
        IssueKind::SafetyConcern
    }

    fn apply(&self, ctx: &CorrectionContext<'_>) -> Result<Revision> {
        let (redacted, found) = redact(&ctx.response.text);
        let caveat = if found.is_empty() {
            format!(
                "Note: review this answer with care before acting on it ({} concern).",
                ctx.issue.source.replace('_', " ")
            )
        } else {
            "Note: personal details were removed from this answer.".to_string()
        };
        Ok(append(ctx, &redacted, &caveat))
    }
}

/// Asks the user to confirm the intended interpretation.
#[derive(Debug, Default)]
pub struct ClarificationStrategy;

impl ClarificationStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl CorrectionStrategy for ClarificationStrategy {
    fn name(&self) -> &'static str {
        "clarification"
    }

    fn kind(&self) -> IssueKind {
        IssueKind::Ambiguity
    }

    fn apply(&self, ctx: &CorrectionContext<'_>) -> Result<Revision> {
        Ok(append(
            ctx,
            &ctx.response.text,
            "If you meant a different reading of the question, say which one and the answer will be adjusted.",
        ))
    }
}

// ============================================================================
// Regenerating revisions
// ============================================================================

/// Regenerates with explicit consistency constraints between conflicting
/// steps.
#[derive(Debug, Default)]
pub struct ConsistencyStrategy;

impl ConsistencyStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl CorrectionStrategy for ConsistencyStrategy {
    fn name(&self) -> &'static str {
        "consistency_constraints"
    }

    fn kind(&self) -> IssueKind {
        IssueKind::ReasoningInconsistency
    }

    fn apply(&self, ctx: &CorrectionContext<'_>) -> Result<Revision> {
        let conflicts = contradictions(ctx.trace);
        let constraints = if conflicts.is_empty() {
            ctx.issue.description.clone()
        } else {
            conflicts
                .iter()
                .map(|(a, b, what)| format!("steps {} and {} must agree ({})", a, b, what))
                .collect::<Vec<_>>()
                .join("; ")
        };
        let request = ctx.request(format!(
            "Regenerate the reasoning with explicit consistency constraints: {}",
            constraints
        ));
        regenerate(ctx, self.name(), request)
    }
}

/// Fills a knowledge gap with a bounded lookup, else documents the
/// limitation in the response.
#[derive(Debug, Default)]
pub struct KnowledgeGapStrategy;

impl KnowledgeGapStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl CorrectionStrategy for KnowledgeGapStrategy {
    fn name(&self) -> &'static str {
        "knowledge_lookup"
    }

    fn kind(&self) -> IssueKind {
        IssueKind::KnowledgeGap
    }

    fn apply(&self, ctx: &CorrectionContext<'_>) -> Result<Revision> {
        if let Some(reasoner) = ctx.reasoner {
            let reasoner = Arc::clone(reasoner);
            let query = ctx.issue.description.clone();
            match call_with_timeout(ctx.lookup_timeout, move || reasoner.lookup(&query)) {
                Some(Ok(evidence)) if !evidence.is_empty() => {
                    let mut request = ctx.request(
                        "Regenerate using the retrieved evidence and ground each claim in it",
                    );
                    request.evidence = evidence;
                    return regenerate(ctx, self.name(), request);
                }
                Some(Ok(_)) => {
                    tracing::debug!(interaction_id = %ctx.interaction_id, "lookup found nothing");
                }
                Some(Err(e)) => {
                    tracing::warn!(interaction_id = %ctx.interaction_id, "lookup failed: {}", e);
                }
                None => {
                    tracing::warn!(
                        interaction_id = %ctx.interaction_id,
                        "lookup timed out after {}ms",
                        ctx.lookup_timeout.as_millis()
                    );
                }
            }
        }

        let limitation = format!(
            "Limitation: these statements could not be checked against a source: {}. Confirm them independently.",
            truncate(&ctx.issue.description, 200)
        );
        Ok(append(ctx, &ctx.response.text, &limitation))
    }
}

/// Retries with a different reasoning method from the fixed catalogue.
#[derive(Debug, Default)]
pub struct AlternateMethodStrategy;

impl AlternateMethodStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl CorrectionStrategy for AlternateMethodStrategy {
    fn name(&self) -> &'static str {
        "alternate_method"
    }

    fn kind(&self) -> IssueKind {
        IssueKind::StrategyMismatch
    }

    fn apply(&self, ctx: &CorrectionContext<'_>) -> Result<Revision> {
        ctx.require_reasoner(self.name())?;
        let method = ALTERNATE_METHODS
            .iter()
            .copied()
            .find(|m| !ctx.tried_methods.contains(m))
            .ok_or_else(|| VigilError::reasoner("alternate method catalogue exhausted"))?;

        let mut request = ctx.request(format!("Solve the task again using {}", method));
        request.method = Some(method);
        regenerate(ctx, self.name(), request)
    }
}

/// Retries through a fallback action path that avoids failing tools.
#[derive(Debug, Default)]
pub struct FallbackPathStrategy;

impl FallbackPathStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl CorrectionStrategy for FallbackPathStrategy {
    fn name(&self) -> &'static str {
        "fallback_path"
    }

    fn kind(&self) -> IssueKind {
        IssueKind::ExecutionFailure
    }

    fn apply(&self, ctx: &CorrectionContext<'_>) -> Result<Revision> {
        let avoid = failed_tools(ctx.trace);
        let instruction = if avoid.is_empty() {
            format!("Retry through a fallback action path: {}", ctx.issue.description)
        } else {
            format!(
                "Retry through a fallback action path that avoids: {}",
                avoid.join(", ")
            )
        };
        let mut request = ctx.request(instruction);
        request.avoid_tools = avoid;
        regenerate(ctx, self.name(), request)
    }
}
