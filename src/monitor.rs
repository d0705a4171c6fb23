//! The monitor: one assessment, end to end.
//!
//! ```text
//! validate -> (detect + calibration lookup) || safety ensemble
//!          -> critical safety? escalate without correction
//!          -> low confidence or medium safety? bounded correction
//!          -> escalation check -> completed | escalated
//!          -> reflection job handed to the scheduler
//! ```
//!
//! Cancellation is checked between stages; a cancelled interaction is
//! deferred and never reflected.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationLookup, CalibrationStore};
use crate::confidence::{ConfidenceAssessment, ConfidenceEstimator};
use crate::config::Config;
use crate::core::{
    CancellationToken, CandidateResponse, Decision, InteractionState, InteractionStatus,
    Lifecycle, ReasoningTrace, Transition,
};
use crate::correct::{CorrectionAction, CorrectionCoordinator, Evaluation, Reasoner};
use crate::detect::UncertaintyDetector;
use crate::error::{Result, VigilError};
use crate::escalation::{EscalationManager, EscalationRequest, ExpertDirectory};
use crate::events::{EventLog, MonitorEvent};
use crate::reflect::{ReflectionEngine, ReflectionJob, ReflectionLog, ReflectionScheduler};
use crate::safety::{SafetyDetector, SafetyIssue, SafetyMonitor};

/// Text delivered in place of a withheld response.
pub const HOLDING_MESSAGE: &str =
    "This response is being reviewed before it can be shared. A reviewer will follow up.";

/// One trace and candidate response to assess.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssessmentRequest {
    pub interaction_id: String,
    pub trace: ReasoningTrace,
    pub response: CandidateResponse,
    /// Overrides the response's task category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_category: Option<String>,
    /// Confidence from an earlier assessment of the same interaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_assessment: Option<f64>,
    #[serde(default)]
    pub goals: Vec<String>,
    /// External outcome feedback in [0, 1], forwarded to reflection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_score: Option<f64>,
}

impl AssessmentRequest {
    pub fn new(
        interaction_id: impl Into<String>,
        trace: ReasoningTrace,
        response: CandidateResponse,
    ) -> Self {
        Self {
            interaction_id: interaction_id.into(),
            trace,
            response,
            task_category: None,
            prior_assessment: None,
            goals: Vec::new(),
            feedback_score: None,
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goals.push(goal.into());
        self
    }

    pub fn with_feedback(mut self, score: f64) -> Self {
        self.feedback_score = Some(score);
        self
    }

    pub fn with_prior(mut self, confidence: f64) -> Self {
        self.prior_assessment = Some(confidence);
        self
    }

    /// Category used for calibration.
    pub fn category(&self) -> &str {
        self.task_category
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&self.response.metadata.task_category)
    }
}

/// Result of an assessment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssessmentOutcome {
    pub interaction_id: String,
    pub status: InteractionStatus,
    /// The response to show: the (possibly corrected) candidate when the
    /// decision releases it, the holding message otherwise.
    pub response: CandidateResponse,
    pub assessment: ConfidenceAssessment,
    #[serde(default)]
    pub safety_issues: Vec<SafetyIssue>,
    #[serde(default)]
    pub corrections: Vec<CorrectionAction>,
    #[serde(flatten)]
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationRequest>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

impl AssessmentOutcome {
    pub fn releases_response(&self) -> bool {
        self.decision.releases_response()
    }
}

/// Meta-cognitive monitor wiring detection, confidence, safety, correction,
/// escalation and reflection.
pub struct Monitor {
    config: Config,
    detector: UncertaintyDetector,
    estimator: ConfidenceEstimator,
    safety: SafetyMonitor,
    coordinator: CorrectionCoordinator,
    escalation: EscalationManager,
    calibration: Arc<dyn CalibrationStore>,
    scheduler: Option<ReflectionScheduler>,
    events: Option<Arc<EventLog>>,
}

impl Monitor {
    /// Monitor with the default detectors and strategies, no reasoner and
    /// no reflection.
    pub fn new(config: Config, calibration: Arc<dyn CalibrationStore>) -> Self {
        let threshold = config.confidence.threshold;
        Self {
            detector: UncertaintyDetector::with_default_strategies(config.uncertainty.clone()),
            estimator: ConfidenceEstimator::new(config.confidence.clone()),
            safety: SafetyMonitor::with_default_detectors(&config.safety),
            coordinator: CorrectionCoordinator::with_default_strategies(
                &config.correction,
                threshold,
            ),
            escalation: EscalationManager::from_config(
                config.escalation.clone(),
                config.safety.escalation_severity(),
            ),
            calibration,
            scheduler: None,
            events: None,
            config,
        }
    }

    pub fn with_reasoner(mut self, reasoner: Arc<dyn Reasoner>) -> Self {
        self.coordinator = self.coordinator.with_reasoner(reasoner);
        self
    }

    pub fn with_expert_directory(mut self, directory: Arc<dyn ExpertDirectory>) -> Self {
        self.escalation = EscalationManager::new(
            directory,
            self.config.escalation.clone(),
            self.config.safety.escalation_severity(),
        );
        self
    }

    pub fn with_safety_detector(mut self, detector: Arc<dyn SafetyDetector>) -> Self {
        self.safety.register(detector);
        self
    }

    pub fn with_events(mut self, events: Arc<EventLog>) -> Self {
        self.events = Some(events);
        self
    }

    /// Start background reflection writing to `log` and feeding this
    /// monitor's calibration store.
    pub fn with_reflection(mut self, log: Arc<ReflectionLog>) -> Result<Self> {
        let mut engine = ReflectionEngine::new(
            Arc::clone(&self.calibration),
            log,
            self.config.reflection.clone(),
        );
        if let Some(events) = &self.events {
            engine = engine.with_events(Arc::clone(events));
        }
        self.scheduler = Some(ReflectionScheduler::start(
            engine,
            self.config.reflection.policy(),
        )?);
        Ok(self)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> Option<&ReflectionScheduler> {
        self.scheduler.as_ref()
    }

    /// Wait for queued reflection. True when nothing is pending.
    pub fn flush_reflections(&self, timeout: Duration) -> bool {
        self.scheduler.as_ref().is_none_or(|s| s.flush(timeout))
    }

    /// Drain reflection and stop the worker.
    pub fn shutdown(mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown();
        }
    }

    /// Confidence and safety for one pair, computed concurrently from the
    /// same inputs.
    pub fn evaluate(
        &self,
        trace: &Arc<ReasoningTrace>,
        response: &Arc<CandidateResponse>,
        category: &str,
        prior: Option<f64>,
    ) -> Evaluation {
        let timeout = self.config.confidence.calibration_timeout();
        let ((report, lookup), safety) = rayon::join(
            || {
                rayon::join(
                    || self.detector.detect_shared(trace, response),
                    || CalibrationLookup::fetch(&self.calibration, category, timeout),
                )
            },
            || self.safety.evaluate(Arc::clone(trace), Arc::clone(response)),
        );
        let assessment = self
            .estimator
            .estimate(trace, response, &report, &lookup, prior);
        Evaluation { assessment, safety }
    }

    /// Assess one interaction.
    ///
    /// Only an inconsistent trace or a lifecycle bug is an error; every
    /// infrastructure failure degrades into the outcome.
    pub fn assess(
        &self,
        request: AssessmentRequest,
        cancel: &CancellationToken,
    ) -> Result<AssessmentOutcome> {
        request.trace.validate()?;
        request.response.validate()?;

        let category = request.category().to_string();
        let id = request.interaction_id.clone();
        let prior = request.prior_assessment;
        let response = if request.response.metadata.task_category == category {
            request.response.clone()
        } else {
            request.response.clone().with_category(&category)
        };
        let trace = Arc::new(request.trace.clone());
        let response = Arc::new(response);

        let evaluation = self.evaluate(&trace, &response, &category, prior);
        self.emit(MonitorEvent::Assessed {
            interaction_id: id.clone(),
            category: category.clone(),
            confidence: evaluation.confidence(),
            reliability: evaluation.assessment.reliability,
            signals: evaluation.assessment.signals.len(),
            max_severity: evaluation.safety.max_severity,
        });

        let mut state = InteractionState::new(&id);
        let mut lifecycle = Lifecycle::new(&mut state, self.config.correction.max_attempts);

        if cancel.is_cancelled() {
            lifecycle.defer()?;
            drop(lifecycle);
            return Ok(self.deferred(state, evaluation, &response, "cancelled after assessment"));
        }

        let bypass = evaluation.safety.blocked;

        let mut corrections = Vec::new();
        let mut disclosure = None;
        let mut exhausted = false;
        let (final_trace, final_response, final_eval) = if bypass {
            tracing::info!(
                interaction_id = %id,
                severity = evaluation.safety.max_severity.map_or("none", |s| s.as_str()),
                "critical safety issue bypasses correction"
            );
            ((*trace).clone(), (*response).clone(), evaluation)
        } else if self.coordinator.needs_correction(&evaluation) {
            let reassess = |t: &ReasoningTrace, r: &CandidateResponse| {
                self.evaluate(&Arc::new(t.clone()), &Arc::new(r.clone()), &category, prior)
            };
            let run = match self.coordinator.correct(
                &id,
                (*trace).clone(),
                (*response).clone(),
                evaluation.clone(),
                &mut lifecycle,
                cancel,
                reassess,
            ) {
                Ok(run) => run,
                Err(VigilError::Cancelled { .. }) => {
                    lifecycle.defer()?;
                    drop(lifecycle);
                    return Ok(self.deferred(
                        state,
                        evaluation,
                        &response,
                        "cancelled during correction",
                    ));
                }
                Err(e) => return Err(e),
            };
            self.emit(MonitorEvent::Corrected {
                interaction_id: id.clone(),
                attempts: run.actions.len(),
                resolved: !run.outcome.is_exhausted(),
                confidence: run.evaluation.confidence(),
            });
            exhausted = run.outcome.is_exhausted();
            disclosure = run.outcome.disclosure().map(str::to_string);
            corrections = run.actions;
            (run.trace, run.response, run.evaluation)
        } else {
            ((*trace).clone(), (*response).clone(), evaluation)
        };

        if cancel.is_cancelled() {
            lifecycle.defer()?;
            drop(lifecycle);
            let response = Arc::new(final_response);
            return Ok(self.deferred(state, final_eval, &response, "cancelled before decision"));
        }

        let triggers =
            self.escalation
                .triggers(&final_eval.assessment, &final_eval.safety, &final_response);
        let (decision, escalation) = if triggers.is_empty() {
            lifecycle.complete()?;
            (Decision::Deliver { disclosure }, None)
        } else {
            lifecycle.begin_escalation()?;
            let request = self.escalation.escalate(
                &id,
                triggers,
                &final_eval.assessment,
                &final_eval.safety,
                &final_response,
                corrections.len(),
            );
            lifecycle.mark_escalated()?;
            self.emit(MonitorEvent::Escalated {
                interaction_id: id.clone(),
                urgency: request.urgency,
                expert_id: request.assigned_expert.clone(),
                reason: request.reason.clone(),
            });
            (request.decision(), Some(request))
        };
        let status = lifecycle.status();
        drop(lifecycle);

        tracing::info!(
            interaction_id = %id,
            decision = decision.name(),
            confidence = final_eval.confidence(),
            corrections = corrections.len(),
            "assessment complete"
        );

        if let Some(scheduler) = &self.scheduler {
            scheduler.submit(ReflectionJob {
                interaction_id: id.clone(),
                task_category: category,
                status,
                trace: final_trace,
                response: final_response.clone(),
                assessment: final_eval.assessment.clone(),
                safety_issues: final_eval.safety.issues.clone(),
                corrections: corrections.clone(),
                exhausted,
                goals: request.goals,
                feedback_score: request.feedback_score,
                closed_at: Utc::now(),
            });
        }

        let shown = if decision.releases_response() {
            final_response
        } else {
            final_response.revised(HOLDING_MESSAGE)
        };

        Ok(AssessmentOutcome {
            interaction_id: id,
            status,
            response: shown,
            assessment: final_eval.assessment,
            safety_issues: final_eval.safety.issues,
            corrections,
            decision,
            escalation,
            transitions: state.transitions,
        })
    }

    fn deferred(
        &self,
        state: InteractionState,
        evaluation: Evaluation,
        response: &CandidateResponse,
        reason: &str,
    ) -> AssessmentOutcome {
        tracing::info!(interaction_id = %state.interaction_id, "deferred: {}", reason);
        self.emit(MonitorEvent::Deferred {
            interaction_id: state.interaction_id.clone(),
            reason: reason.to_string(),
        });
        AssessmentOutcome {
            interaction_id: state.interaction_id,
            status: state.status,
            response: response.revised(HOLDING_MESSAGE),
            assessment: evaluation.assessment,
            safety_issues: evaluation.safety.issues,
            corrections: Vec::new(),
            decision: Decision::Deferred,
            escalation: None,
            transitions: state.transitions,
        }
    }

    fn emit(&self, event: MonitorEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("detectors", &self.detector.strategy_names())
            .field("safety_detectors", &self.safety.detector_names())
            .field("reflection", &self.scheduler.as_ref().map(|s| s.policy().name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationCurve, CalibrationSample, MemoryCalibrationStore};
    use crate::config::ExpertConfig;
    use crate::confidence::Reliability;
    use crate::correct::test_support::ScriptedReasoner;
    use crate::core::{ReasoningMethod, ReasoningStep};
    use crate::detect::UncertaintyType;
    use crate::escalation::Urgency;
    use crate::safety::{SafetyCategory, Severity};
    use tempfile::TempDir;

    fn store_with(category: &str, predicted: f64, observed: f64, n: usize) -> Arc<MemoryCalibrationStore> {
        let store = Arc::new(MemoryCalibrationStore::default());
        let samples: Vec<_> = (0..n)
            .map(|_| CalibrationSample::new(predicted, observed))
            .collect();
        store.record(category, &samples).unwrap();
        store
    }

    fn paris_request(id: &str, reported: f64) -> AssessmentRequest {
        let trace = ReasoningTrace::new(
            vec![ReasoningStep::new(
                0,
                "What is the capital of France?",
                ReasoningMethod::Retrieval,
                "The capital of France is Paris.",
                0.9,
            )],
            reported,
        );
        AssessmentRequest::new(id, trace, CandidateResponse::new("The capital of France is Paris."))
    }

    fn hedged_request(id: &str) -> AssessmentRequest {
        let trace = ReasoningTrace::new(
            vec![ReasoningStep::new(
                0,
                "How did revenue change?",
                ReasoningMethod::Deduction,
                "Revenue grew",
                0.6,
            )],
            0.6,
        );
        AssessmentRequest::new(
            id,
            trace,
            CandidateResponse::new(
                "Revenue might have grown 40% in 2023. Perhaps it will continue. Maybe not.",
            ),
        )
    }

    fn bias_request(id: &str, reported: f64) -> AssessmentRequest {
        let trace = ReasoningTrace::new(
            vec![ReasoningStep::new(
                0,
                "Screen the engineering candidates",
                ReasoningMethod::Deduction,
                "Candidate shortlist",
                reported,
            )],
            reported,
        );
        AssessmentRequest::new(
            id,
            trace,
            CandidateResponse::new(
                "Women are not suited for engineering roles and should not be hired.",
            )
            .with_domain_tag("hiring"),
        )
    }

    fn fairness_expert() -> ExpertConfig {
        ExpertConfig {
            id: "fairness-desk".to_string(),
            name: "Fairness Desk".to_string(),
            expertise: vec!["fairness".to_string()],
            response_time_minutes: 30,
            available: true,
        }
    }

    struct UnreachableStore;

    impl CalibrationStore for UnreachableStore {
        fn snapshot(&self, _category: &str) -> Result<Option<CalibrationCurve>> {
            Err(VigilError::calibration_unavailable("connection refused"))
        }

        fn record(&self, _category: &str, _samples: &[CalibrationSample]) -> Result<CalibrationCurve> {
            Err(VigilError::calibration_unavailable("connection refused"))
        }

        fn categories(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_well_calibrated_response_is_delivered() {
        let monitor = Monitor::new(Config::default(), store_with("general", 0.95, 0.95, 50));
        let outcome = monitor
            .assess(paris_request("int-a", 0.95), &CancellationToken::new())
            .unwrap();

        let c = outcome.assessment.confidence;
        assert!((0.9..=0.95).contains(&c), "got {}", c);
        assert_eq!(outcome.status, InteractionStatus::Completed);
        assert_eq!(outcome.decision, Decision::Deliver { disclosure: None });
        assert!(outcome.corrections.is_empty());
        assert_eq!(outcome.response.text, "The capital of France is Paris.");
        assert_eq!(outcome.transitions.len(), 1);
    }

    #[test]
    fn test_hedged_unsupported_response_is_corrected() {
        let mut scripted = ScriptedReasoner::new(0.9, "Revenue grew last year.");
        scripted.evidence = vec!["Annual report: revenue grew 40% in 2023.".to_string()];
        let reasoner = Arc::new(scripted);
        let monitor = Monitor::new(Config::default(), Arc::new(MemoryCalibrationStore::default()))
            .with_reasoner(reasoner.clone());

        let request = hedged_request("int-b");
        let initial = monitor.evaluate(
            &Arc::new(request.trace.clone()),
            &Arc::new(request.response.clone()),
            "general",
            None,
        );
        let semantic = initial
            .assessment
            .signals
            .iter()
            .find(|s| s.uncertainty_type == UncertaintyType::Semantic)
            .unwrap();
        let factual = initial
            .assessment
            .signals
            .iter()
            .find(|s| s.uncertainty_type == UncertaintyType::Factual)
            .unwrap();
        assert!(semantic.magnitude > 0.3);
        assert!(factual.magnitude > 0.3);
        assert!(initial.confidence() < 0.7);

        let outcome = monitor.assess(request, &CancellationToken::new()).unwrap();
        assert_eq!(outcome.corrections.len(), 1);
        assert_eq!(reasoner.requests().len(), 1);
        assert!(outcome.corrections[0].success);
        assert_eq!(outcome.corrections[0].strategy, "knowledge_lookup");
        assert_eq!(outcome.status, InteractionStatus::Completed);
        assert_eq!(outcome.decision, Decision::Deliver { disclosure: None });
    }

    #[test]
    fn test_critical_bias_escalates_without_correction() {
        let reasoner = Arc::new(ScriptedReasoner::new(0.9, "revised"));
        let config = Config {
            escalation: crate::config::EscalationConfig {
                experts: vec![fairness_expert()],
                ..Default::default()
            },
            ..Config::default()
        };
        let monitor = Monitor::new(config, Arc::new(MemoryCalibrationStore::default()))
            .with_reasoner(reasoner.clone());

        // Confidence is high; safety alone forces escalation
        let outcome = monitor
            .assess(bias_request("int-c", 0.95), &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome.status, InteractionStatus::Escalated);
        assert!(outcome.corrections.is_empty());
        assert!(reasoner.requests().is_empty());
        assert!(outcome
            .safety_issues
            .iter()
            .any(|i| i.category == SafetyCategory::Bias && i.severity == Severity::Critical));

        let escalation = outcome.escalation.as_ref().unwrap();
        assert_eq!(escalation.urgency, Urgency::High);
        assert_eq!(escalation.required_expertise, "fairness");
        assert_eq!(
            outcome.decision,
            Decision::Escalate {
                expert_id: "fairness-desk".to_string()
            }
        );
        assert!(!outcome.releases_response());
        assert_eq!(outcome.response.text, HOLDING_MESSAGE);
    }

    #[test]
    fn test_high_safety_issue_with_low_confidence_is_corrected_then_escalated() {
        let monitor = Monitor::new(Config::default(), Arc::new(MemoryCalibrationStore::default()))
            .with_reasoner(Arc::new(StubbornReasoner));
        let trace = ReasoningTrace::new(
            vec![ReasoningStep::new(
                0,
                "Who should lead the team?",
                ReasoningMethod::Deduction,
                "Leadership assessment",
                0.3,
            )],
            0.3,
        );
        let request = AssessmentRequest::new(
            "int-c3",
            trace,
            CandidateResponse::new("All women are naturally unfit for leadership."),
        );

        let outcome = monitor.assess(request, &CancellationToken::new()).unwrap();
        let worst = outcome.safety_issues.first().map(|i| i.severity);
        assert_eq!(worst, Some(Severity::High));
        assert!(outcome.assessment.confidence < 0.7);
        assert!(!outcome.corrections.is_empty());
        // High severity still escalates after correction
        assert_eq!(outcome.status, InteractionStatus::Escalated);
    }

    #[test]
    fn test_escalation_without_expert_blocks() {
        let monitor = Monitor::new(Config::default(), Arc::new(MemoryCalibrationStore::default()));
        let outcome = monitor
            .assess(bias_request("int-c2", 0.3), &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome.status, InteractionStatus::Escalated);
        assert_eq!(outcome.decision, Decision::BlockedPendingReview);
        assert!(outcome.corrections.is_empty());
    }

    #[test]
    fn test_unreachable_calibration_degrades() {
        let monitor = Monitor::new(Config::default(), Arc::new(UnreachableStore));
        let outcome = monitor
            .assess(paris_request("int-d", 0.95), &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome.assessment.reliability, Reliability::Low);
        assert_eq!(outcome.assessment.factors.historical, 0.5);
        assert!(outcome.assessment.rationale.contains("calibration unavailable"));
    }

    #[test]
    fn test_assessment_is_deterministic() {
        let monitor = Monitor::new(Config::default(), store_with("general", 0.6, 0.5, 30));
        let a = monitor
            .assess(hedged_request("int-e"), &CancellationToken::new())
            .unwrap();
        let b = monitor
            .assess(hedged_request("int-e"), &CancellationToken::new())
            .unwrap();
        assert_eq!(a.assessment, b.assessment);
        assert_eq!(a.decision, b.decision);
        assert_eq!(a.safety_issues, b.safety_issues);
    }

    #[test]
    fn test_detection_is_idempotent() {
        let monitor = Monitor::new(Config::default(), Arc::new(MemoryCalibrationStore::default()));
        let request = hedged_request("int-f");
        let trace = Arc::new(request.trace);
        let response = Arc::new(request.response);
        let first = monitor.evaluate(&trace, &response, "general", None);
        let second = monitor.evaluate(&trace, &response, "general", None);
        assert_eq!(first, second);
    }

    #[test]
    fn test_overconfidence_feedback_lowers_historical_factor() {
        let temp = TempDir::new().unwrap();
        let store = store_with("general", 0.9, 0.9, 20);
        let log = Arc::new(ReflectionLog::new(temp.path().join("reflections.jsonl")));
        let monitor = Monitor::new(Config::default(), store.clone())
            .with_reflection(log.clone())
            .unwrap();

        let before = monitor
            .assess(paris_request("int-0", 0.9), &CancellationToken::new())
            .unwrap()
            .assessment
            .factors
            .historical;

        for i in 1..=20 {
            monitor
                .assess(
                    paris_request(&format!("int-{}", i), 0.9).with_feedback(0.2),
                    &CancellationToken::new(),
                )
                .unwrap();
        }
        assert!(monitor.flush_reflections(Duration::from_secs(10)));
        assert_eq!(log.count().unwrap(), 21);

        let after = monitor
            .assess(paris_request("int-last", 0.9), &CancellationToken::new())
            .unwrap()
            .assessment
            .factors
            .historical;
        assert!(after < before, "before {} after {}", before, after);
    }

    struct StubbornReasoner;

    impl Reasoner for StubbornReasoner {
        fn regenerate(
            &self,
            request: &crate::correct::RegenerationRequest,
        ) -> Result<crate::correct::Regeneration> {
            Ok(crate::correct::Regeneration {
                trace: request.trace.clone(),
                response: request.response.clone(),
            })
        }

        fn lookup(&self, _query: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_correction_attempts_are_bounded() {
        for max in 1..=3 {
            let mut config = Config::default();
            config.correction.max_attempts = max;
            let monitor = Monitor::new(config, Arc::new(MemoryCalibrationStore::default()))
                .with_reasoner(Arc::new(StubbornReasoner));
            let outcome = monitor
                .assess(hedged_request("int-g"), &CancellationToken::new())
                .unwrap();
            assert!(outcome.corrections.len() <= max as usize);
        }
    }

    #[test]
    fn test_cancelled_interaction_is_deferred_and_not_reflected() {
        let temp = TempDir::new().unwrap();
        let log = Arc::new(ReflectionLog::new(temp.path().join("reflections.jsonl")));
        let events = Arc::new(EventLog::new(temp.path().join("events.jsonl")));
        let monitor = Monitor::new(Config::default(), Arc::new(MemoryCalibrationStore::default()))
            .with_events(events.clone())
            .with_reflection(log.clone())
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let outcome = monitor.assess(paris_request("int-h", 0.95), &token).unwrap();

        assert_eq!(outcome.status, InteractionStatus::Deferred);
        assert_eq!(outcome.decision, Decision::Deferred);
        assert_eq!(outcome.response.text, HOLDING_MESSAGE);
        assert!(monitor.flush_reflections(Duration::from_secs(5)));
        assert_eq!(log.count().unwrap(), 0);

        let names: Vec<&str> = events
            .recent(10)
            .unwrap()
            .iter()
            .map(|e| e.event.name())
            .collect();
        assert_eq!(names, vec!["assessed", "deferred"]);
    }

    #[test]
    fn test_inconsistent_trace_is_an_error() {
        let monitor = Monitor::new(Config::default(), Arc::new(MemoryCalibrationStore::default()));
        let request = AssessmentRequest::new(
            "int-i",
            ReasoningTrace::new(vec![], 0.9),
            CandidateResponse::new("text"),
        );
        let err = monitor.assess(request, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, VigilError::InconsistentTrace { .. }));
    }

    #[test]
    fn test_request_category_override() {
        let request = paris_request("int-j", 0.9);
        assert_eq!(request.category(), "general");
        let request = AssessmentRequest {
            task_category: Some("geography".to_string()),
            ..request
        };
        assert_eq!(request.category(), "geography");
    }

    #[test]
    fn test_outcome_json_shape() {
        let monitor = Monitor::new(Config::default(), store_with("general", 0.95, 0.95, 50));
        let outcome = monitor
            .assess(paris_request("int-k", 0.95), &CancellationToken::new())
            .unwrap();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["decision"], "deliver");
        assert_eq!(json["status"], "completed");
        assert!(json.get("escalation").is_none());
    }
}
