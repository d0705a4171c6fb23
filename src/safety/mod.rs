//! Safety monitoring.
//!
//! Six detector categories run concurrently over the same immutable trace
//! and response. Overall severity is the maximum issue severity. A critical
//! issue short-circuits the evaluation once the detectors registered ahead
//! of it have reported; the remaining detectors still finish and are logged
//! in the background for audit.

pub mod alignment;
pub mod bias;
pub mod harmful;
pub mod manipulation;
pub mod misinformation;
pub mod privacy;

pub use alignment::ValueAlignmentDetector;
pub use bias::BiasDetector;
pub use harmful::HarmfulContentDetector;
pub use manipulation::ManipulationDetector;
pub use misinformation::MisinformationDetector;
pub use privacy::PrivacyDetector;

use std::cmp::Reverse;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::SafetyConfig;
use crate::core::{CandidateResponse, ReasoningTrace};
use crate::error::{Result, VigilError};

/// Issue severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse a severity name (case-insensitive).
    pub fn parse(value: &str) -> Option<Severity> {
        match value.trim().to_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a safety issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyCategory {
    Bias,
    HarmfulContent,
    Misinformation,
    Privacy,
    ValueMisalignment,
    Manipulation,
}

impl SafetyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyCategory::Bias => "bias",
            SafetyCategory::HarmfulContent => "harmful_content",
            SafetyCategory::Misinformation => "misinformation",
            SafetyCategory::Privacy => "privacy",
            SafetyCategory::ValueMisalignment => "value_misalignment",
            SafetyCategory::Manipulation => "manipulation",
        }
    }

    /// Expertise tag a human reviewer needs for this category.
    pub fn expertise(&self) -> &'static str {
        match self {
            SafetyCategory::Bias => "fairness",
            SafetyCategory::HarmfulContent => "trust_and_safety",
            SafetyCategory::Misinformation => "fact_checking",
            SafetyCategory::Privacy => "privacy",
            SafetyCategory::ValueMisalignment => "ethics",
            SafetyCategory::Manipulation => "security",
        }
    }
}

impl std::fmt::Display for SafetyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One safety finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SafetyIssue {
    pub category: SafetyCategory,
    pub severity: Severity,
    pub evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_groups: Vec<String>,
    /// Detector that raised the issue.
    pub detector: String,
}

impl SafetyIssue {
    pub fn new(
        category: SafetyCategory,
        severity: Severity,
        detector: impl Into<String>,
        evidence: Vec<String>,
    ) -> Self {
        Self {
            category,
            severity,
            evidence,
            affected_groups: Vec::new(),
            detector: detector.into(),
        }
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.affected_groups = groups;
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// One safety detector.
pub trait SafetyDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn category(&self) -> SafetyCategory;

    /// Inspect the inputs; an empty vec means nothing found.
    fn inspect(
        &self,
        trace: &ReasoningTrace,
        response: &CandidateResponse,
    ) -> Result<Vec<SafetyIssue>>;
}

/// Output of one safety evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SafetyReport {
    /// Issues ordered by severity (most severe first).
    pub issues: Vec<SafetyIssue>,
    pub max_severity: Option<Severity>,
    /// A critical issue was found; the response must not be delivered.
    pub blocked: bool,
    /// Detectors that failed, panicked or missed the deadline.
    pub failed_detectors: Vec<String>,
    /// Every detector reported before the report was returned.
    pub complete: bool,
}

impl SafetyReport {
    fn from_issues(mut issues: Vec<SafetyIssue>, failed: Vec<String>, complete: bool) -> Self {
        issues.sort_by(|a, b| {
            (Reverse(a.severity), a.category, &a.evidence).cmp(&(
                Reverse(b.severity),
                b.category,
                &b.evidence,
            ))
        });
        let max_severity = issues.iter().map(|i| i.severity).max();
        let blocked = max_severity == Some(Severity::Critical);
        Self {
            issues,
            max_severity,
            blocked,
            failed_detectors: failed,
            complete,
        }
    }

    /// Whether the worst issue is at least `severity`.
    pub fn reaches(&self, severity: Severity) -> bool {
        self.max_severity.is_some_and(|s| s >= severity)
    }

    /// The most severe issue, if any.
    pub fn worst(&self) -> Option<&SafetyIssue> {
        self.issues.first()
    }
}

type DetectorOutcome = std::result::Result<Vec<SafetyIssue>, String>;
type DetectorResult = (usize, DetectorOutcome);

/// Runs the safety detector ensemble.
pub struct SafetyMonitor {
    detectors: Vec<Arc<dyn SafetyDetector>>,
    timeout: Duration,
}

impl SafetyMonitor {
    /// Empty monitor; register detectors explicitly.
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            detectors: Vec::new(),
            timeout: config.detector_timeout(),
        }
    }

    /// Monitor with all six detector categories.
    pub fn with_default_detectors(config: &SafetyConfig) -> Self {
        let mut monitor = Self::new(config);
        monitor.register(Arc::new(BiasDetector::new(config.regulated_domains.clone())));
        monitor.register(Arc::new(HarmfulContentDetector::new()));
        monitor.register(Arc::new(MisinformationDetector::new()));
        monitor.register(Arc::new(PrivacyDetector::new()));
        monitor.register(Arc::new(ValueAlignmentDetector::new()));
        monitor.register(Arc::new(ManipulationDetector::new()));
        monitor
    }

    /// Add a detector, replacing any with the same name.
    pub fn register(&mut self, detector: Arc<dyn SafetyDetector>) {
        self.detectors.retain(|d| d.name() != detector.name());
        self.detectors.push(detector);
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Evaluate the inputs.
    ///
    /// Never fails: detector errors, panics and timeouts are recorded in
    /// `failed_detectors` and treated as no issues. A critical issue ends
    /// the evaluation once every detector registered ahead of it has
    /// reported; the report then covers exactly that prefix.
    pub fn evaluate(
        &self,
        trace: Arc<ReasoningTrace>,
        response: Arc<CandidateResponse>,
    ) -> SafetyReport {
        if self.detectors.is_empty() {
            return SafetyReport::from_issues(Vec::new(), Vec::new(), true);
        }

        let names: Vec<&'static str> = self.detectors.iter().map(|d| d.name()).collect();
        let deadline = Instant::now() + self.timeout;
        let (tx, rx) = mpsc::channel::<DetectorResult>();
        let mut results: Vec<Option<DetectorOutcome>> = vec![None; names.len()];
        let mut waiting = 0usize;

        for (index, detector) in self.detectors.iter().enumerate() {
            let detector = Arc::clone(detector);
            let trace = Arc::clone(&trace);
            let response = Arc::clone(&response);
            let tx = tx.clone();
            let name = names[index];
            let spawned = thread::Builder::new()
                .name(format!("vigil-safety-{}", name))
                .spawn(move || {
                    let outcome =
                        catch_unwind(AssertUnwindSafe(|| detector.inspect(&trace, &response)));
                    let result = match outcome {
                        Ok(Ok(issues)) => Ok(issues),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(VigilError::detector(name, "panicked").to_string()),
                    };
                    let _ = tx.send((index, result));
                });
            match spawned {
                Ok(_) => waiting += 1,
                Err(e) => results[index] = Some(Err(format!("failed to spawn: {}", e))),
            }
        }
        drop(tx);

        while waiting > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((index, result)) => {
                    results[index] = Some(result);
                    waiting -= 1;
                    if waiting == 0 {
                        break;
                    }
                    if let Some(cut) = critical_prefix(&results) {
                        tracing::info!(
                            detector = names[cut],
                            pending = waiting,
                            "critical safety issue, short-circuiting"
                        );
                        for (index, result) in results.iter_mut().enumerate().skip(cut + 1) {
                            if let Some(result) = result.take() {
                                audit_result(names[index], result);
                            }
                        }
                        audit_remaining(rx, names.clone(), deadline);
                        results.truncate(cut + 1);
                        let (issues, failed) = collect_results(&names, results);
                        return SafetyReport::from_issues(issues, failed, false);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let late: Vec<String> = results
            .iter()
            .enumerate()
            .filter(|(_, result)| result.is_none())
            .map(|(index, _)| names[index].to_string())
            .collect();
        for name in &late {
            tracing::warn!(
                "safety detector '{}' missed the {}ms deadline",
                name,
                self.timeout.as_millis()
            );
        }
        let (issues, mut failed) = collect_results(&names, results);
        failed.extend(late);
        failed.sort();
        SafetyReport::from_issues(issues, failed, true)
    }
}

/// Index of the first detector with a critical issue, provided every
/// detector before it has reported.
fn critical_prefix(results: &[Option<DetectorOutcome>]) -> Option<usize> {
    for (index, result) in results.iter().enumerate() {
        match result {
            None => return None,
            Some(Ok(issues)) if issues.iter().any(SafetyIssue::is_critical) => {
                return Some(index)
            }
            Some(_) => {}
        }
    }
    None
}

/// Split reported results into issues and sorted failed detector names.
/// Detectors that have not reported are skipped.
fn collect_results(
    names: &[&'static str],
    results: Vec<Option<DetectorOutcome>>,
) -> (Vec<SafetyIssue>, Vec<String>) {
    let mut issues = Vec::new();
    let mut failed = Vec::new();
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Some(Ok(found)) => issues.extend(found),
            Some(Err(message)) => {
                tracing::warn!("safety detector '{}' failed: {}", names[index], message);
                failed.push(names[index].to_string());
            }
            None => {}
        }
    }
    failed.sort();
    (issues, failed)
}

fn audit_result(name: &str, result: DetectorOutcome) {
    match result {
        Ok(issues) => {
            for issue in issues {
                tracing::info!(
                    detector = name,
                    category = %issue.category,
                    severity = %issue.severity,
                    "safety audit"
                );
            }
        }
        Err(message) => {
            tracing::warn!("safety detector '{}' failed during audit: {}", name, message);
        }
    }
}

/// Drain the remaining detectors in the background and log their findings.
fn audit_remaining(rx: Receiver<DetectorResult>, names: Vec<&'static str>, deadline: Instant) {
    let spawned = thread::Builder::new()
        .name("vigil-safety-audit".to_string())
        .spawn(move || loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((index, result)) => audit_result(names[index], result),
                Err(_) => break,
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("failed to spawn safety audit thread: {}", e);
    }
}

/// Join sentences of `text` that match `pred`, for use as evidence.
pub(crate) fn matching_sentences<'a>(
    text: &'a str,
    pred: impl Fn(&str) -> bool,
) -> Vec<&'a str> {
    crate::util::sentences(text)
        .into_iter()
        .filter(|s| pred(s))
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::core::{CandidateResponse, ReasoningMethod, ReasoningStep, ReasoningTrace};

    pub fn trace() -> ReasoningTrace {
        ReasoningTrace::new(
            vec![ReasoningStep::new(
                0,
                "question",
                ReasoningMethod::Deduction,
                "answer",
                0.8,
            )],
            0.8,
        )
    }

    pub fn response(text: &str) -> CandidateResponse {
        CandidateResponse::new(text)
    }
}
