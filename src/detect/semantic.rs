//! Semantic uncertainty: hedging, vague terms, competing interpretations.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::{CandidateResponse, ReasoningTrace};
use crate::detect::{noisy_or, Detection, UncertaintyStrategy, UncertaintyType};
use crate::error::Result;

static RE_HEDGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(maybe|perhaps|possibly|might|probably|presumably|arguably|i think|i believe|i guess|it seems|seems to|appears to|not sure|unclear|sort of|kind of|could be)\b",
    )
    .unwrap()
});

static RE_VAGUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(some|several|various|a few|many|things|stuff|etc|it depends|soon|recently|somewhere|somehow)\b")
        .unwrap()
});

/// Hedge saturation factor: three hedges cross the default threshold, two do not.
const HEDGE_DECAY: f64 = 0.85;

/// Alternatives within this distance of the chosen step compete with it.
pub const INTERPRETATION_MARGIN: f64 = 0.15;

const VAGUE_WEIGHT: f64 = 0.08;
const VAGUE_CAP: f64 = 0.25;

/// Detects ambiguity in the response and competing readings in the trace.
#[derive(Debug, Default)]
pub struct SemanticStrategy;

impl SemanticStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl UncertaintyStrategy for SemanticStrategy {
    fn name(&self) -> &'static str {
        "semantic"
    }

    fn uncertainty_type(&self) -> UncertaintyType {
        UncertaintyType::Semantic
    }

    fn detect(
        &self,
        trace: &ReasoningTrace,
        response: &CandidateResponse,
    ) -> Result<Option<Detection>> {
        let mut evidence = Vec::new();

        let hedges: Vec<&str> = RE_HEDGE
            .find_iter(&response.text)
            .map(|m| m.as_str())
            .collect();
        let hedge_magnitude = 1.0 - HEDGE_DECAY.powi(hedges.len() as i32);
        if !hedges.is_empty() {
            evidence.push(format!(
                "{} hedge(s) in response: {}",
                hedges.len(),
                hedges.join(", ")
            ));
        }

        let vague: Vec<&str> = RE_VAGUE
            .find_iter(&response.text)
            .map(|m| m.as_str())
            .collect();
        let vague_magnitude = (vague.len() as f64 * VAGUE_WEIGHT).min(VAGUE_CAP);
        if !vague.is_empty() {
            evidence.push(format!("vague term(s): {}", vague.join(", ")));
        }

        let mut competing = 0usize;
        for step in &trace.steps {
            for alt in &step.alternatives {
                if (step.confidence - alt.confidence).abs() <= INTERPRETATION_MARGIN {
                    competing += 1;
                    evidence.push(format!(
                        "step {}: alternative '{}' ({:.2}) competes with chosen reading ({:.2})",
                        step.index, alt.description, alt.confidence, step.confidence
                    ));
                }
            }
        }
        let interpretation_magnitude = if competing == 0 {
            0.0
        } else {
            (0.4 + 0.1 * (competing as f64 - 1.0)).min(0.8)
        };

        let magnitude = noisy_or([hedge_magnitude, vague_magnitude, interpretation_magnitude]);
        if magnitude == 0.0 {
            return Ok(None);
        }

        Ok(Some(Detection::new(
            magnitude,
            evidence,
            "state the assumed interpretation or ask the user to clarify",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ReasoningMethod, ReasoningStep};
    use crate::detect::test_support::{response, single_step};

    fn detect(trace: &ReasoningTrace, text: &str) -> Option<Detection> {
        SemanticStrategy::new().detect(trace, &response(text)).unwrap()
    }

    #[test]
    fn test_clean_response_no_signal() {
        let trace = single_step("Paris is the capital of France", 0.9);
        assert!(detect(&trace, "Paris is the capital of France.").is_none());
    }

    #[test]
    fn test_three_hedges_cross_threshold() {
        let trace = single_step("x", 0.6);
        let d = detect(&trace, "It might work. Perhaps it will. Maybe not.").unwrap();
        assert!(d.magnitude > 0.3, "got {}", d.magnitude);
        assert!(d.evidence[0].starts_with("3 hedge(s)"));
    }

    #[test]
    fn test_two_hedges_stay_below_threshold() {
        let trace = single_step("x", 0.6);
        let d = detect(&trace, "It might work. Perhaps it will.").unwrap();
        assert!(d.magnitude <= 0.3, "got {}", d.magnitude);
    }

    #[test]
    fn test_competing_alternative() {
        let trace = ReasoningTrace::new(
            vec![ReasoningStep::new(
                0,
                "Book the bank appointment",
                ReasoningMethod::Abduction,
                "financial institution",
                0.55,
            )
            .with_alternative("river bank", 0.5)
            .with_alternative("blood bank", 0.1)],
            0.55,
        );
        let d = detect(&trace, "Booked at the financial institution.").unwrap();
        assert!((d.magnitude - 0.4).abs() < 1e-9);
        assert_eq!(d.evidence.len(), 1);
        assert!(d.evidence[0].contains("river bank"));
    }

    #[test]
    fn test_vague_terms_alone_stay_weak() {
        let trace = single_step("x", 0.9);
        let d = detect(&trace, "Several things happened recently, etc.").unwrap();
        assert!(d.magnitude <= VAGUE_CAP + 1e-12);
    }
}
