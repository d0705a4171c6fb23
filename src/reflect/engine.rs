//! Reflection analyses.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;

use crate::calibration::{CalibrationSample, CalibrationStore};
use crate::config::ReflectionConfig;
use crate::core::ReasoningMethod;
use crate::detect::procedural::failed_tools;
use crate::detect::UncertaintyType;
use crate::error::{Result, VigilError};
use crate::events::{EventLog, MonitorEvent};
use crate::reflect::{
    AlternativePath, CalibrationAdjustment, ProcessQuality, ReflectionJob, ReflectionLog,
    ReflectionRecord,
};
use crate::util::content_terms;

/// Share of a goal's terms that must appear for it to count as achieved.
pub const GOAL_COVERAGE: f64 = 0.5;

/// Outcome vs process weight when deriving observed accuracy without
/// feedback.
const OUTCOME_WEIGHT: f64 = 0.7;
const PROCESS_WEIGHT: f64 = 0.3;

/// Steps at which a trace counts as fully deep.
const FULL_DEPTH_STEPS: f64 = 4.0;

/// Runs the four analyses and persists their results.
pub struct ReflectionEngine {
    store: Arc<dyn CalibrationStore>,
    log: Arc<ReflectionLog>,
    events: Option<Arc<EventLog>>,
    config: ReflectionConfig,
}

impl ReflectionEngine {
    pub fn new(
        store: Arc<dyn CalibrationStore>,
        log: Arc<ReflectionLog>,
        config: ReflectionConfig,
    ) -> Self {
        Self {
            store,
            log,
            events: None,
            config,
        }
    }

    pub fn with_events(mut self, events: Arc<EventLog>) -> Self {
        self.events = Some(events);
        self
    }

    /// Reflect on a closed interaction.
    ///
    /// Appends the record to the log, then records its calibration samples.
    /// Interactions that were never completed or escalated are rejected.
    pub fn reflect(&self, job: &ReflectionJob) -> Result<ReflectionRecord> {
        if !job.status.is_reflectable() {
            return Err(VigilError::invalid_state(format!(
                "Cannot reflect on {} interaction {}",
                job.status, job.interaction_id
            )));
        }

        let window = self
            .log
            .recent_for_category(&job.task_category, self.config.pattern_window as usize)?;

        let outcome_score = outcome_achievement(job);
        let process = process_quality(job);
        let alternatives = alternative_paths(job, outcome_score, &window);
        let issues = issue_tags(job);
        let recurring_issues = recurring(&issues, &window, self.config.recurring_threshold);

        let observed = job
            .feedback_score
            .map(|f| f.clamp(0.0, 1.0))
            .unwrap_or(OUTCOME_WEIGHT * outcome_score + PROCESS_WEIGHT * process.score);
        let adjustment = CalibrationAdjustment {
            category: job.task_category.clone(),
            predicted: job.trace.reported_confidence.clamp(0.0, 1.0),
            observed,
        };

        let record = ReflectionRecord {
            interaction_id: job.interaction_id.clone(),
            task_category: job.task_category.clone(),
            status: job.status,
            outcome_score,
            process,
            alternatives,
            issues,
            recurring_issues,
            calibration_adjustments: vec![adjustment],
            dominant_method: job.trace.dominant_method(),
            reported_confidence: job.trace.reported_confidence,
            assessed_confidence: job.assessment.confidence,
            reflected_at: Utc::now(),
        };

        self.log.append(&record)?;
        for adj in &record.calibration_adjustments {
            let sample = CalibrationSample::new(adj.predicted, adj.observed)
                .for_interaction(&record.interaction_id);
            self.store.record(&adj.category, &[sample])?;
        }

        if !record.recurring_issues.is_empty() {
            tracing::info!(
                category = %record.task_category,
                "recurring issues: {}",
                record.recurring_issues.join(", ")
            );
        }
        tracing::debug!(
            interaction_id = %record.interaction_id,
            outcome = record.outcome_score,
            process = record.process.score,
            "reflection recorded"
        );
        if let Some(events) = &self.events {
            events.emit(MonitorEvent::Reflected {
                interaction_id: record.interaction_id.clone(),
                category: record.task_category.clone(),
                outcome_score: record.outcome_score,
                process_score: record.process.score,
                recurring_issues: record.recurring_issues.clone(),
            });
        }

        Ok(record)
    }
}

// =============================================================================
// Outcome achievement
// =============================================================================

/// Fraction of declared goals reflected in the final response and trace.
///
/// External feedback overrides; with no goals, the final step confidence is
/// the proxy.
pub fn outcome_achievement(job: &ReflectionJob) -> f64 {
    if let Some(feedback) = job.feedback_score {
        return feedback.clamp(0.0, 1.0);
    }
    if job.goals.is_empty() {
        return job
            .trace
            .steps
            .last()
            .map(|s| s.confidence.clamp(0.0, 1.0))
            .unwrap_or(0.0);
    }

    let mut produced: BTreeSet<String> = content_terms(&job.response.text).into_iter().collect();
    for step in &job.trace.steps {
        produced.extend(content_terms(&step.output));
    }

    let achieved = job
        .goals
        .iter()
        .filter(|goal| {
            let terms: BTreeSet<String> = content_terms(goal).into_iter().collect();
            if terms.is_empty() {
                return true;
            }
            let hit = terms.iter().filter(|t| produced.contains(*t)).count();
            hit as f64 / terms.len() as f64 >= GOAL_COVERAGE
        })
        .count();
    achieved as f64 / job.goals.len() as f64
}

// =============================================================================
// Process quality
// =============================================================================

/// Score logical consistency, completeness, information usage and depth.
pub fn process_quality(job: &ReflectionJob) -> ProcessQuality {
    let trace = &job.trace;
    let signal = |kind: UncertaintyType| {
        job.assessment
            .signals
            .iter()
            .filter(|s| s.uncertainty_type == kind)
            .map(|s| s.magnitude)
            .fold(0.0, f64::max)
    };

    let logical_consistency = 1.0 - signal(UncertaintyType::Logical);

    let completeness = if trace.is_empty() {
        0.0
    } else {
        let answered = trace
            .steps
            .iter()
            .filter(|s| !s.output.trim().is_empty())
            .count();
        answered as f64 / trace.len() as f64
    };

    let response_terms: BTreeSet<String> =
        content_terms(&job.response.text).into_iter().collect();
    let evidence: Vec<_> = trace.evidence_steps().collect();
    let information_usage = if evidence.is_empty() {
        if signal(UncertaintyType::Factual) > 0.0 {
            0.5
        } else {
            0.8
        }
    } else {
        let used = evidence
            .iter()
            .filter(|s| {
                content_terms(&s.output)
                    .iter()
                    .any(|t| response_terms.contains(t))
            })
            .count();
        used as f64 / evidence.len() as f64
    };

    let considered_alternatives = trace.steps.iter().any(|s| !s.alternatives.is_empty());
    let depth = 0.8 * (trace.len() as f64 / FULL_DEPTH_STEPS).min(1.0)
        + if considered_alternatives { 0.2 } else { 0.0 };

    let score = 0.3 * logical_consistency
        + 0.3 * completeness
        + 0.2 * information_usage
        + 0.2 * depth;

    ProcessQuality {
        logical_consistency,
        completeness,
        information_usage,
        depth,
        score: score.clamp(0.0, 1.0),
    }
}

// =============================================================================
// Alternative paths
// =============================================================================

/// Alternatives considered in the trace, plus methods that produced better
/// outcomes in the category's recent history.
pub fn alternative_paths(
    job: &ReflectionJob,
    outcome_score: f64,
    history: &[ReflectionRecord],
) -> Vec<AlternativePath> {
    let mut paths: Vec<AlternativePath> = job
        .trace
        .steps
        .iter()
        .flat_map(|step| {
            step.alternatives.iter().map(move |alt| AlternativePath {
                description: alt.description.clone(),
                source: format!("step {}", step.index),
                estimated_quality: alt.confidence,
            })
        })
        .collect();

    let used = job.trace.dominant_method();
    let mut by_method: BTreeMap<&'static str, (ReasoningMethod, f64, usize)> = BTreeMap::new();
    for record in history {
        if let Some(method) = record.dominant_method {
            let entry = by_method.entry(method.as_str()).or_insert((method, 0.0, 0));
            entry.1 += record.outcome_score;
            entry.2 += 1;
        }
    }
    for (method, total, n) in by_method.into_values() {
        let mean = total / n as f64;
        if Some(method) != used && mean > outcome_score {
            paths.push(AlternativePath {
                description: format!(
                    "use {} (mean outcome {:.2} over {} similar interactions)",
                    method, mean, n
                ),
                source: "history".to_string(),
                estimated_quality: mean,
            });
        }
    }

    paths.sort_by(|a, b| {
        b.estimated_quality
            .total_cmp(&a.estimated_quality)
            .then_with(|| a.description.cmp(&b.description))
    });
    paths
}

// =============================================================================
// Pattern analysis
// =============================================================================

/// Issue tags observed in one interaction, sorted and deduplicated.
pub fn issue_tags(job: &ReflectionJob) -> Vec<String> {
    let mut tags = BTreeSet::new();
    for signal in &job.assessment.signals {
        tags.insert(format!("uncertainty:{}", signal.uncertainty_type));
    }
    for issue in &job.safety_issues {
        tags.insert(format!("safety:{}", issue.category));
    }
    for action in job.corrections.iter().filter(|a| !a.success) {
        tags.insert(format!("correction:{}_failed", action.strategy));
    }
    if job.exhausted {
        tags.insert("correction:exhausted".to_string());
    }
    for tool in failed_tools(&job.trace) {
        tags.insert(format!("tool:{}", tool));
    }
    tags.into_iter().collect()
}

/// Tags occurring at least `threshold` times across the window plus the
/// current interaction.
pub fn recurring(current: &[String], window: &[ReflectionRecord], threshold: u32) -> Vec<String> {
    let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
    for tag in current
        .iter()
        .chain(window.iter().flat_map(|r| r.issues.iter()))
    {
        *counts.entry(tag.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .filter(|(tag, n)| *n >= threshold.max(1) && current.iter().any(|c| c.as_str() == *tag))
        .map(|(tag, _)| tag.to_string())
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;

    use crate::confidence::{ConfidenceAssessment, FactorBreakdown, Reliability};
    use crate::config::FactorWeights;
    use crate::core::{
        CandidateResponse, InteractionStatus, ReasoningMethod, ReasoningStep, ReasoningTrace,
    };
    use crate::reflect::ReflectionJob;

    pub fn job(id: &str, category: &str, reported: f64, text: &str) -> ReflectionJob {
        let trace = ReasoningTrace::new(
            vec![ReasoningStep::new(
                0,
                "question",
                ReasoningMethod::Deduction,
                text,
                reported,
            )],
            reported,
        );
        ReflectionJob {
            interaction_id: id.to_string(),
            task_category: category.to_string(),
            status: InteractionStatus::Completed,
            trace,
            response: CandidateResponse::new(text).with_category(category),
            assessment: ConfidenceAssessment {
                confidence: reported,
                factors: FactorBreakdown {
                    reported,
                    coherence: reported,
                    historical: 0.5,
                    uncertainty_impact: 1.0,
                    weights: FactorWeights::default(),
                },
                signals: vec![],
                rationale: String::new(),
                reliability: Reliability::Normal,
                history_samples: 0,
                prior_confidence: None,
                failed_detectors: vec![],
            },
            safety_issues: vec![],
            corrections: vec![],
            exhausted: false,
            goals: vec![],
            feedback_score: None,
            closed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::job;
    use super::*;
    use crate::calibration::MemoryCalibrationStore;
    use crate::core::{InteractionStatus, ReasoningStep, ReasoningTrace};
    use crate::detect::UncertaintySignal;
    use tempfile::TempDir;

    fn engine(temp: &TempDir) -> (ReflectionEngine, Arc<MemoryCalibrationStore>) {
        let store = Arc::new(MemoryCalibrationStore::default());
        let log = Arc::new(ReflectionLog::new(temp.path().join("reflections.jsonl")));
        let engine = ReflectionEngine::new(store.clone(), log, ReflectionConfig::default());
        (engine, store)
    }

    #[test]
    fn test_outcome_from_goals() {
        let mut j = job("1", "travel", 0.8, "Booked a flight to Lisbon on Friday.");
        j.goals = vec![
            "book flight to Lisbon".to_string(),
            "reserve hotel near the beach".to_string(),
        ];
        assert!((outcome_achievement(&j) - 0.5).abs() < 1e-9);

        j.feedback_score = Some(0.9);
        assert_eq!(outcome_achievement(&j), 0.9);
    }

    #[test]
    fn test_outcome_without_goals_uses_final_step() {
        let j = job("1", "general", 0.65, "answer");
        assert_eq!(outcome_achievement(&j), 0.65);
    }

    #[test]
    fn test_process_quality_weights() {
        let mut j = job("1", "general", 0.8, "answer");
        j.assessment.signals.push(UncertaintySignal {
            detector: "logical".to_string(),
            uncertainty_type: UncertaintyType::Logical,
            magnitude: 0.5,
            evidence: vec![],
            mitigation: String::new(),
        });
        let p = process_quality(&j);
        assert_eq!(p.logical_consistency, 0.5);
        assert_eq!(p.completeness, 1.0);
        assert_eq!(p.information_usage, 0.8);
        assert!((p.depth - 0.2).abs() < 1e-9);
        let expected = 0.3 * 0.5 + 0.3 * 1.0 + 0.2 * 0.8 + 0.2 * 0.2;
        assert!((p.score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_alternatives_from_trace_and_history() {
        let mut j = job("1", "research", 0.5, "answer");
        j.trace = ReasoningTrace::new(
            vec![ReasoningStep::new(0, "q", ReasoningMethod::Deduction, "a", 0.5)
                .with_alternative("ask for the source document", 0.6)],
            0.5,
        );

        let temp = TempDir::new().unwrap();
        let (engine, _) = engine(&temp);
        let mut better = job("h", "research", 0.9, "x");
        better.trace.steps[0].method = ReasoningMethod::Retrieval;
        let history = vec![engine.reflect(&better).unwrap()];

        let paths = alternative_paths(&j, 0.5, &history);
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].source, "history");
        assert!(paths[0].description.starts_with("use retrieval"));
        assert_eq!(paths[1].source, "step 0");
    }

    #[test]
    fn test_recurring_issues() {
        let temp = TempDir::new().unwrap();
        let (engine, _) = engine(&temp);

        let mut last = None;
        for i in 0..3 {
            let mut j = job(&format!("{}", i), "travel", 0.7, "answer");
            j.exhausted = true;
            last = Some(engine.reflect(&j).unwrap());
        }
        let last = last.unwrap();
        assert_eq!(last.recurring_issues, vec!["correction:exhausted".to_string()]);
    }

    #[test]
    fn test_overconfidence_lowers_calibration() {
        let temp = TempDir::new().unwrap();
        let (engine, store) = engine(&temp);

        for i in 0..25 {
            let mut j = job(&format!("{}", i), "finance", 0.9, "answer");
            j.feedback_score = Some(0.3);
            engine.reflect(&j).unwrap();
        }

        let curve = store.snapshot("finance").unwrap().unwrap();
        assert_eq!(curve.sample_count, 25);
        assert!(curve.lookup(0.9).unwrap() < 0.5);
    }

    #[test]
    fn test_deferred_is_rejected() {
        let temp = TempDir::new().unwrap();
        let (engine, store) = engine(&temp);
        let mut j = job("d", "general", 0.8, "answer");
        j.status = InteractionStatus::Deferred;

        assert!(engine.reflect(&j).is_err());
        assert!(store.snapshot("general").unwrap().is_none());
    }
}
