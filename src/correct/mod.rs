//! Self-correction.
//!
//! When confidence is below threshold, or the worst safety issue is medium,
//! the coordinator picks the highest-priority issue, applies the strategy
//! registered for its kind, and re-assesses the result. Attempts are
//! strictly sequential and bounded by the lifecycle. A revision replaces
//! the candidate only when it is a strict improvement.

pub mod strategies;

pub use strategies::{
    AlternateMethodStrategy, CaveatStrategy, ClarificationStrategy, ConsistencyStrategy,
    FallbackPathStrategy, KnowledgeGapStrategy, ALTERNATE_METHODS,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::confidence::ConfidenceAssessment;
use crate::config::CorrectionConfig;
use crate::core::{
    CancellationToken, CandidateResponse, Lifecycle, ReasoningMethod, ReasoningTrace,
};
use crate::detect::UncertaintyType;
use crate::error::{Result, VigilError};
use crate::safety::{SafetyReport, Severity};

/// External reasoning collaborator used to regenerate traces and fetch
/// evidence.
pub trait Reasoner: Send + Sync {
    /// Produce a fresh trace and response for the request.
    fn regenerate(&self, request: &RegenerationRequest) -> Result<Regeneration>;

    /// Look up evidence for a query. Called under a timeout.
    fn lookup(&self, query: &str) -> Result<Vec<String>>;
}

impl<T: Reasoner + ?Sized> Reasoner for Arc<T> {
    fn regenerate(&self, request: &RegenerationRequest) -> Result<Regeneration> {
        (**self).regenerate(request)
    }

    fn lookup(&self, query: &str) -> Result<Vec<String>> {
        (**self).lookup(query)
    }
}

/// What the reasoner is asked to do differently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegenerationRequest {
    pub interaction_id: String,
    pub attempt: u32,
    /// Trace being replaced.
    pub trace: ReasoningTrace,
    pub response: CandidateResponse,
    /// Instruction describing the constraint to honor.
    pub instruction: String,
    /// Reasoning method to use instead of the original.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<ReasoningMethod>,
    /// Tools the new path must avoid.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub avoid_tools: Vec<String>,
    /// Evidence gathered by lookup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

/// A regenerated trace and response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Regeneration {
    pub trace: ReasoningTrace,
    pub response: CandidateResponse,
}

/// Kind of issue a correction addresses, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    SafetyConcern,
    ReasoningInconsistency,
    ExecutionFailure,
    KnowledgeGap,
    Ambiguity,
    StrategyMismatch,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::SafetyConcern => "safety_concern",
            IssueKind::ReasoningInconsistency => "reasoning_inconsistency",
            IssueKind::ExecutionFailure => "execution_failure",
            IssueKind::KnowledgeGap => "knowledge_gap",
            IssueKind::Ambiguity => "ambiguity",
            IssueKind::StrategyMismatch => "strategy_mismatch",
        }
    }

    fn for_signal(uncertainty_type: UncertaintyType) -> IssueKind {
        match uncertainty_type {
            UncertaintyType::Logical => IssueKind::ReasoningInconsistency,
            UncertaintyType::Procedural => IssueKind::ExecutionFailure,
            UncertaintyType::Factual => IssueKind::KnowledgeGap,
            UncertaintyType::Semantic => IssueKind::Ambiguity,
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The issue that triggered a correction attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueRef {
    pub kind: IssueKind,
    /// Detector or safety category that raised it.
    pub source: String,
    pub description: String,
}

/// Record of one correction attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrectionAction {
    pub attempt: u32,
    pub trigger: IssueRef,
    pub strategy: String,
    /// Revised response text, if the strategy produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_response: Option<String>,
    pub confidence_before: f64,
    pub confidence_after: f64,
    /// The revision replaced the candidate.
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal result of a correction run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CorrectionOutcome {
    /// Confidence reached the threshold and no medium safety issue remains.
    Resolved,
    /// Attempts ran out; deliver with the disclosure.
    Exhausted { disclosure: String },
}

impl CorrectionOutcome {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, CorrectionOutcome::Exhausted { .. })
    }

    pub fn disclosure(&self) -> Option<&str> {
        match self {
            CorrectionOutcome::Exhausted { disclosure } => Some(disclosure),
            CorrectionOutcome::Resolved => None,
        }
    }
}

/// Assessment of one (trace, response) pair: confidence plus safety.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub assessment: ConfidenceAssessment,
    pub safety: SafetyReport,
}

impl Evaluation {
    pub fn confidence(&self) -> f64 {
        self.assessment.confidence
    }

    fn has_medium_safety(&self) -> bool {
        self.safety.max_severity == Some(Severity::Medium)
    }
}

/// Inputs handed to a strategy for one attempt.
pub struct CorrectionContext<'a> {
    pub interaction_id: &'a str,
    pub attempt: u32,
    pub trace: &'a ReasoningTrace,
    pub response: &'a CandidateResponse,
    pub issue: &'a IssueRef,
    pub evaluation: &'a Evaluation,
    /// Methods already used or tried in this interaction.
    pub tried_methods: &'a [ReasoningMethod],
    pub reasoner: Option<&'a Arc<dyn Reasoner>>,
    pub lookup_timeout: Duration,
}

impl CorrectionContext<'_> {
    /// The reasoner, or an error naming the strategy that needed it.
    pub fn require_reasoner(&self, strategy: &str) -> Result<&Arc<dyn Reasoner>> {
        self.reasoner.ok_or_else(|| {
            VigilError::reasoner(format!("'{}' needs a reasoner, none configured", strategy))
        })
    }

    /// Base regeneration request for this attempt.
    pub fn request(&self, instruction: impl Into<String>) -> RegenerationRequest {
        RegenerationRequest {
            interaction_id: self.interaction_id.to_string(),
            attempt: self.attempt,
            trace: self.trace.clone(),
            response: self.response.clone(),
            instruction: instruction.into(),
            method: None,
            avoid_tools: Vec::new(),
            evidence: Vec::new(),
        }
    }
}

/// A strategy's proposed revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    pub trace: ReasoningTrace,
    pub response: CandidateResponse,
    /// Method the revision used, if it switched methods.
    pub method: Option<ReasoningMethod>,
}

/// One correction strategy, registered for a single issue kind.
pub trait CorrectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> IssueKind;

    fn apply(&self, ctx: &CorrectionContext<'_>) -> Result<Revision>;
}

/// Result of a correction run.
#[derive(Debug, Clone)]
pub struct CorrectionRun {
    pub trace: ReasoningTrace,
    pub response: CandidateResponse,
    pub evaluation: Evaluation,
    pub actions: Vec<CorrectionAction>,
    pub outcome: CorrectionOutcome,
}

/// Select the issue to address next.
///
/// Priority: safety > logical > execution > factual > ambiguity > strategy.
/// Kinds already attempted are skipped; strategy mismatch is the fallback.
pub fn select_issue(evaluation: &Evaluation, attempted: &[IssueKind]) -> IssueRef {
    let mut candidates: Vec<IssueRef> = Vec::new();

    if let Some(issue) = evaluation
        .safety
        .issues
        .iter()
        .find(|i| i.severity == Severity::Medium)
    {
        candidates.push(IssueRef {
            kind: IssueKind::SafetyConcern,
            source: issue.category.as_str().to_string(),
            description: issue.evidence.join("; "),
        });
    }
    for signal in &evaluation.assessment.signals {
        candidates.push(IssueRef {
            kind: IssueKind::for_signal(signal.uncertainty_type),
            source: signal.detector.clone(),
            description: signal.evidence.join("; "),
        });
    }
    candidates.sort_by_key(|c| c.kind);

    candidates
        .into_iter()
        .find(|c| !attempted.contains(&c.kind))
        .unwrap_or_else(|| IssueRef {
            kind: IssueKind::StrategyMismatch,
            source: "confidence".to_string(),
            description: format!(
                "confidence {:.2} with no unaddressed signal",
                evaluation.confidence()
            ),
        })
}

/// Low-confidence disclosure appended when attempts run out.
pub fn disclosure(confidence: f64, attempts: usize) -> String {
    format!(
        "Low confidence ({:.0}%): this answer could not be verified after {} correction attempt{}. Please double-check it before relying on it.",
        confidence * 100.0,
        attempts,
        if attempts == 1 { "" } else { "s" }
    )
}

/// Applies correction strategies in bounded, sequential attempts.
pub struct CorrectionCoordinator {
    strategies: HashMap<IssueKind, Arc<dyn CorrectionStrategy>>,
    reasoner: Option<Arc<dyn Reasoner>>,
    threshold: f64,
    lookup_timeout: Duration,
}

impl CorrectionCoordinator {
    /// Coordinator with no strategies registered.
    pub fn new(config: &CorrectionConfig, threshold: f64) -> Self {
        Self {
            strategies: HashMap::new(),
            reasoner: None,
            threshold,
            lookup_timeout: config.lookup_timeout(),
        }
    }

    /// Coordinator with one strategy per issue kind.
    pub fn with_default_strategies(config: &CorrectionConfig, threshold: f64) -> Self {
        let mut coordinator = Self::new(config, threshold);
        coordinator.register(Arc::new(CaveatStrategy::new()));
        coordinator.register(Arc::new(ConsistencyStrategy::new()));
        coordinator.register(Arc::new(FallbackPathStrategy::new()));
        coordinator.register(Arc::new(KnowledgeGapStrategy::new()));
        coordinator.register(Arc::new(ClarificationStrategy::new()));
        coordinator.register(Arc::new(AlternateMethodStrategy::new()));
        coordinator
    }

    pub fn with_reasoner(mut self, reasoner: Arc<dyn Reasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    /// Register a strategy, replacing the one for its kind.
    pub fn register(&mut self, strategy: Arc<dyn CorrectionStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    /// Whether an evaluation needs correction.
    pub fn needs_correction(&self, evaluation: &Evaluation) -> bool {
        evaluation.confidence() < self.threshold || evaluation.has_medium_safety()
    }

    /// Run correction attempts until resolved or the lifecycle refuses more.
    ///
    /// `reassess` evaluates a regenerated pair from scratch; it is never
    /// given a stale assessment.
    #[allow(clippy::too_many_arguments)]
    pub fn correct<F>(
        &self,
        interaction_id: &str,
        trace: ReasoningTrace,
        response: CandidateResponse,
        evaluation: Evaluation,
        lifecycle: &mut Lifecycle<'_>,
        cancel: &CancellationToken,
        mut reassess: F,
    ) -> Result<CorrectionRun>
    where
        F: FnMut(&ReasoningTrace, &CandidateResponse) -> Evaluation,
    {
        let mut current_trace = trace;
        let mut current_response = response;
        let mut current = evaluation;
        let mut actions = Vec::new();
        let mut attempted_kinds: Vec<IssueKind> = Vec::new();
        let mut tried_methods: Vec<ReasoningMethod> =
            current_trace.dominant_method().into_iter().collect();

        while self.needs_correction(&current) && lifecycle.can_correct() {
            if cancel.is_cancelled() {
                return Err(VigilError::cancelled(interaction_id));
            }
            let attempt = lifecycle.begin_correction()?;
            let issue = select_issue(&current, &attempted_kinds);
            if issue.kind != IssueKind::StrategyMismatch {
                attempted_kinds.push(issue.kind);
            }

            let before = current.confidence();
            let Some(strategy) = self.strategies.get(&issue.kind) else {
                tracing::warn!(
                    interaction_id = %interaction_id,
                    "no correction strategy registered for {}",
                    issue.kind
                );
                actions.push(failed_action(attempt, issue, "none", before, "no strategy"));
                lifecycle.finish_correction()?;
                continue;
            };

            let ctx = CorrectionContext {
                interaction_id,
                attempt,
                trace: &current_trace,
                response: &current_response,
                issue: &issue,
                evaluation: &current,
                tried_methods: &tried_methods,
                reasoner: self.reasoner.as_ref(),
                lookup_timeout: self.lookup_timeout,
            };

            match strategy.apply(&ctx) {
                Ok(revision) => {
                    if let Some(method) = revision.method {
                        tried_methods.push(method);
                    }
                    let revised = reassess(&revision.trace, &revision.response);
                    let improved = is_improvement(&current, &revised, issue.kind);
                    tracing::info!(
                        interaction_id = %interaction_id,
                        attempt,
                        strategy = strategy.name(),
                        before,
                        after = revised.confidence(),
                        improved,
                        "correction attempt"
                    );
                    actions.push(CorrectionAction {
                        attempt,
                        trigger: issue,
                        strategy: strategy.name().to_string(),
                        modified_response: Some(revision.response.text.clone()),
                        confidence_before: before,
                        confidence_after: revised.confidence(),
                        success: improved,
                        error: None,
                    });
                    if improved {
                        current_trace = revision.trace;
                        current_response = revision.response;
                        current = revised;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        interaction_id = %interaction_id,
                        attempt,
                        "correction strategy '{}' failed: {}",
                        strategy.name(),
                        e
                    );
                    actions.push(failed_action(
                        attempt,
                        issue,
                        strategy.name(),
                        before,
                        &e.to_string(),
                    ));
                }
            }
            lifecycle.finish_correction()?;
        }

        let outcome = if self.needs_correction(&current) {
            CorrectionOutcome::Exhausted {
                disclosure: disclosure(current.confidence(), actions.len()),
            }
        } else {
            CorrectionOutcome::Resolved
        };

        Ok(CorrectionRun {
            trace: current_trace,
            response: current_response,
            evaluation: current,
            actions,
            outcome,
        })
    }
}

/// A revision wins only on strictly higher confidence. It must not push the
/// worst severity to high, and a safety revision must not raise it at all.
fn is_improvement(current: &Evaluation, revised: &Evaluation, kind: IssueKind) -> bool {
    if revised.confidence() <= current.confidence() {
        return false;
    }
    if kind == IssueKind::SafetyConcern
        && revised.safety.max_severity > current.safety.max_severity
    {
        return false;
    }
    !revised.safety.reaches(Severity::High) || current.safety.reaches(Severity::High)
}

fn failed_action(
    attempt: u32,
    trigger: IssueRef,
    strategy: &str,
    confidence: f64,
    error: &str,
) -> CorrectionAction {
    CorrectionAction {
        attempt,
        trigger,
        strategy: strategy.to_string(),
        modified_response: None,
        confidence_before: confidence,
        confidence_after: confidence,
        success: false,
        error: Some(error.to_string()),
    }
}
