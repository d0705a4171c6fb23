//! Confidence estimation.
//!
//! Combines four factors into one calibrated score:
//!
//! - **reported**: the model's own confidence
//! - **coherence**: how well the trace holds together
//! - **historical**: observed accuracy at this confidence for the category
//! - **uncertainty impact**: `1 - noisy_or(signal magnitudes)`
//!
//! The estimator only reads a calibration snapshot; it never writes.

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationLookup;
use crate::config::{ConfidenceConfig, FactorWeights};
use crate::core::{CandidateResponse, ReasoningTrace};
use crate::detect::{DetectionReport, UncertaintySignal, UncertaintyType};

/// Share of the logical signal subtracted from coherence.
pub const LOGICAL_PENALTY: f64 = 0.5;

/// Prior/current difference reported as a sharp shift.
pub const PRIOR_SHIFT: f64 = 0.3;

/// How much the assessment itself can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    /// Calibration history was sufficient.
    Normal,
    /// Calibration was missing, thin or unreachable.
    Low,
    /// Every uncertainty strategy failed; the score rests on the trace alone.
    Deferred,
}

impl Reliability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reliability::Normal => "normal",
            Reliability::Low => "low",
            Reliability::Deferred => "deferred",
        }
    }
}

/// Individual factor values and the normalized weights applied to them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactorBreakdown {
    pub reported: f64,
    pub coherence: f64,
    pub historical: f64,
    pub uncertainty_impact: f64,
    pub weights: FactorWeights,
}

/// Calibrated confidence for one (trace, response) pair.
///
/// Carries no timestamp: identical inputs produce equal assessments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceAssessment {
    /// Final score in [0, 1].
    pub confidence: f64,
    pub factors: FactorBreakdown,
    pub signals: Vec<UncertaintySignal>,
    pub rationale: String,
    pub reliability: Reliability,
    /// Calibration samples behind the historical factor.
    pub history_samples: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_confidence: Option<f64>,
    /// Uncertainty strategies that failed during detection.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_detectors: Vec<String>,
}

impl ConfidenceAssessment {
    /// Whether the score falls below `threshold`.
    pub fn is_below(&self, threshold: f64) -> bool {
        self.confidence < threshold
    }
}

/// Confidence estimator.
#[derive(Debug, Clone)]
pub struct ConfidenceEstimator {
    config: ConfidenceConfig,
}

impl ConfidenceEstimator {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    /// Threshold below which correction is attempted.
    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    /// Coherence of the trace given the logical signal strength.
    pub fn coherence(trace: &ReasoningTrace, logical_magnitude: f64) -> f64 {
        let raw = 0.7 * trace.mean_step_confidence() + 0.3 * trace.min_step_confidence();
        clamp_unit(raw - LOGICAL_PENALTY * logical_magnitude)
    }

    /// Produce the assessment. Pure apart from reading `lookup`.
    pub fn estimate(
        &self,
        trace: &ReasoningTrace,
        _response: &CandidateResponse,
        report: &DetectionReport,
        lookup: &CalibrationLookup,
        prior: Option<f64>,
    ) -> ConfidenceAssessment {
        let reported = clamp_unit(trace.reported_confidence);
        let coherence = Self::coherence(trace, report.magnitude_of(UncertaintyType::Logical));
        let aggregate = report.aggregate_magnitude();
        let uncertainty_impact = clamp_unit(1.0 - aggregate);

        let neutral = clamp_unit(self.config.neutral_history);
        let min_samples = self.config.min_history_samples;
        let (historical, history_samples, mut reliability, history_note) = match lookup {
            CalibrationLookup::Unavailable(reason) => (
                neutral,
                0,
                Reliability::Low,
                format!("calibration unavailable ({}), neutral {:.2}", reason, neutral),
            ),
            CalibrationLookup::Available(None) => (
                neutral,
                0,
                Reliability::Low,
                format!("no calibration history, neutral {:.2}", neutral),
            ),
            CalibrationLookup::Available(Some(curve)) if curve.sample_count < min_samples => (
                neutral,
                curve.sample_count,
                Reliability::Low,
                format!(
                    "only {} of {} calibration samples, neutral {:.2}",
                    curve.sample_count, min_samples, neutral
                ),
            ),
            CalibrationLookup::Available(Some(curve)) => {
                let value = curve.lookup(reported).map(clamp_unit).unwrap_or(neutral);
                (
                    value,
                    curve.sample_count,
                    Reliability::Normal,
                    format!("historical {:.2} from {} samples", value, curve.sample_count),
                )
            }
        };
        if report.is_blind() {
            reliability = Reliability::Deferred;
        }

        let weights = self.config.weights.normalized();
        let confidence = clamp_unit(
            weights.reported * reported
                + weights.coherence * coherence
                + weights.historical * historical
                + weights.uncertainty * uncertainty_impact,
        );

        let signal_note = if report.signals.is_empty() {
            "no uncertainty signals".to_string()
        } else {
            let kinds: Vec<String> = report
                .signals
                .iter()
                .map(|s| format!("{} {:.2}", s.uncertainty_type, s.magnitude))
                .collect();
            format!("signals: {}", kinds.join(", "))
        };
        let mut rationale = format!(
            "confidence {:.2}: reported {:.2}, coherence {:.2}, {}, uncertainty impact {:.2} ({})",
            confidence, reported, coherence, history_note, uncertainty_impact, signal_note
        );
        if !report.failed.is_empty() {
            rationale.push_str(&format!(
                "; detectors failed: {}",
                report.failed.join(", ")
            ));
        }
        if let Some(p) = prior {
            if (confidence - p).abs() > PRIOR_SHIFT {
                rationale.push_str(&format!("; shifted sharply from prior {:.2}", p));
            }
        }

        tracing::debug!(
            reported,
            coherence,
            historical,
            uncertainty_impact,
            confidence,
            "confidence factors"
        );

        ConfidenceAssessment {
            confidence,
            factors: FactorBreakdown {
                reported,
                coherence,
                historical,
                uncertainty_impact,
                weights,
            },
            signals: report.signals.clone(),
            rationale,
            reliability,
            history_samples,
            prior_confidence: prior,
            failed_detectors: report.failed.clone(),
        }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationCurve, CalibrationSample};
    use crate::core::{ReasoningMethod, ReasoningStep};
    use proptest::prelude::*;

    fn trace(step_confidences: &[f64], reported: f64) -> ReasoningTrace {
        ReasoningTrace::new(
            step_confidences
                .iter()
                .enumerate()
                .map(|(i, c)| ReasoningStep::new(i, "in", ReasoningMethod::Deduction, "out", *c))
                .collect(),
            reported,
        )
    }

    fn curve(predicted: f64, observed: f64, n: usize) -> CalibrationCurve {
        let mut curve = CalibrationCurve::new("general");
        let samples: Vec<_> = (0..n)
            .map(|_| CalibrationSample::new(predicted, observed))
            .collect();
        curve.record(&samples, 500);
        curve
    }

    fn signal(kind: UncertaintyType, magnitude: f64) -> UncertaintySignal {
        UncertaintySignal {
            detector: kind.as_str().to_string(),
            uncertainty_type: kind,
            magnitude,
            evidence: vec![],
            mitigation: String::new(),
        }
    }

    fn estimator() -> ConfidenceEstimator {
        ConfidenceEstimator::new(ConfidenceConfig::default())
    }

    #[test]
    fn test_well_calibrated_clean_trace() {
        let t = trace(&[0.9], 0.95);
        let lookup = CalibrationLookup::Available(Some(curve(0.95, 0.95, 50)));
        let a = estimator().estimate(
            &t,
            &CandidateResponse::new("Paris."),
            &DetectionReport::default(),
            &lookup,
            None,
        );

        assert!((a.confidence - 0.945).abs() < 1e-9, "got {}", a.confidence);
        assert_eq!(a.reliability, Reliability::Normal);
        assert_eq!(a.history_samples, 50);
        assert!(a.rationale.contains("no uncertainty signals"));
    }

    #[test]
    fn test_thin_history_is_low_reliability() {
        let t = trace(&[0.9], 0.9);
        let lookup = CalibrationLookup::Available(Some(curve(0.9, 0.1, 5)));
        let a = estimator().estimate(
            &t,
            &CandidateResponse::new("x"),
            &DetectionReport::default(),
            &lookup,
            None,
        );
        assert_eq!(a.factors.historical, 0.5);
        assert_eq!(a.reliability, Reliability::Low);
        assert!(a.rationale.contains("only 5 of 20"));
    }

    #[test]
    fn test_unavailable_calibration_uses_neutral() {
        let t = trace(&[0.8], 0.8);
        let lookup = CalibrationLookup::Unavailable("connection refused".to_string());
        let a = estimator().estimate(
            &t,
            &CandidateResponse::new("x"),
            &DetectionReport::default(),
            &lookup,
            None,
        );
        assert_eq!(a.factors.historical, 0.5);
        assert_eq!(a.reliability, Reliability::Low);
        assert!(a.rationale.contains("calibration unavailable"));
    }

    #[test]
    fn test_logical_signal_lowers_coherence() {
        let t = trace(&[0.8, 0.8], 0.8);
        let report = DetectionReport {
            signals: vec![signal(UncertaintyType::Logical, 0.6)],
            failed: vec![],
            attempted: 4,
        };
        let a = estimator().estimate(
            &t,
            &CandidateResponse::new("x"),
            &report,
            &CalibrationLookup::Available(None),
            None,
        );
        assert!((a.factors.coherence - 0.5).abs() < 1e-9);
        assert!((a.factors.uncertainty_impact - 0.4).abs() < 1e-9);
        assert_eq!(a.signals.len(), 1);
    }

    #[test]
    fn test_blind_detection_is_deferred() {
        let report = DetectionReport {
            signals: vec![],
            failed: vec!["semantic".to_string()],
            attempted: 1,
        };
        let a = estimator().estimate(
            &trace(&[0.9], 0.9),
            &CandidateResponse::new("x"),
            &report,
            &CalibrationLookup::Available(Some(curve(0.9, 0.9, 30))),
            None,
        );
        assert_eq!(a.reliability, Reliability::Deferred);
        assert!(a.rationale.contains("detectors failed: semantic"));
    }

    #[test]
    fn test_prior_shift_noted() {
        let a = estimator().estimate(
            &trace(&[0.9], 0.9),
            &CandidateResponse::new("x"),
            &DetectionReport::default(),
            &CalibrationLookup::Available(None),
            Some(0.2),
        );
        assert_eq!(a.prior_confidence, Some(0.2));
        assert!(a.rationale.contains("shifted sharply from prior 0.20"));
    }

    #[test]
    fn test_overconfident_history_lowers_score() {
        let t = trace(&[0.9], 0.9);
        let good = estimator().estimate(
            &t,
            &CandidateResponse::new("x"),
            &DetectionReport::default(),
            &CalibrationLookup::Available(Some(curve(0.9, 0.9, 30))),
            None,
        );
        let bad = estimator().estimate(
            &t,
            &CandidateResponse::new("x"),
            &DetectionReport::default(),
            &CalibrationLookup::Available(Some(curve(0.9, 0.4, 30))),
            None,
        );
        assert!(bad.factors.historical < good.factors.historical);
        assert!(bad.confidence < good.confidence);
    }

    proptest! {
        // Property: confidence always lands in [0, 1] and is deterministic
        #[test]
        fn prop_confidence_bounded_and_deterministic(
            steps in prop::collection::vec(0.0f64..=1.0, 1..6),
            reported in 0.0f64..=1.0,
            magnitudes in prop::collection::vec(0.0f64..=1.0, 0..4),
        ) {
            let t = trace(&steps, reported);
            let report = DetectionReport {
                signals: magnitudes.iter().map(|m| signal(UncertaintyType::Factual, *m)).collect(),
                failed: vec![],
                attempted: 4,
            };
            let lookup = CalibrationLookup::Available(None);
            let response = CandidateResponse::new("x");
            let first = estimator().estimate(&t, &response, &report, &lookup, None);
            let second = estimator().estimate(&t, &response, &report, &lookup, None);
            prop_assert!((0.0..=1.0).contains(&first.confidence));
            prop_assert_eq!(first, second);
        }
    }
}
