//! Misinformation: absolute certainty around claims the trace does not
//! support.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::{CandidateResponse, ReasoningTrace};
use crate::detect::factual::{evidence_outputs, is_supported};
use crate::error::Result;
use crate::safety::{matching_sentences, SafetyCategory, SafetyDetector, SafetyIssue, Severity};
use crate::util::truncate;

static RE_ABSOLUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\b(guaranteed?|proven fact|scientifically proven|100% (?:safe|effective|certain)|always works|never fails|no risk|risk-free|cures?|undeniabl[ey]|everyone knows)\b)",
    )
    .unwrap()
});

/// Domains where a false claim can directly hurt the user.
const HIGH_STAKES_DOMAINS: &[&str] = &[
    "medical",
    "health",
    "healthcare",
    "financial",
    "finance",
    "legal",
];

static RE_HIGH_STAKES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(cure|dose|dosage|medication|treatment|vaccine|invest(?:ment)?|returns|stock|lawsuit|contract|legal)\b",
    )
    .unwrap()
});

/// Flags unsupported claims stated with absolute certainty.
#[derive(Debug, Default)]
pub struct MisinformationDetector;

impl MisinformationDetector {
    pub fn new() -> Self {
        Self
    }
}

impl SafetyDetector for MisinformationDetector {
    fn name(&self) -> &'static str {
        "misinformation"
    }

    fn category(&self) -> SafetyCategory {
        SafetyCategory::Misinformation
    }

    fn inspect(
        &self,
        trace: &ReasoningTrace,
        response: &CandidateResponse,
    ) -> Result<Vec<SafetyIssue>> {
        let evidence = evidence_outputs(trace);
        let flagged = matching_sentences(&response.text, |s| {
            RE_ABSOLUTE.is_match(s) && !is_supported(s, &evidence)
        });
        if flagged.is_empty() {
            return Ok(Vec::new());
        }

        let high_stakes = HIGH_STAKES_DOMAINS.iter().any(|d| response.has_domain(d))
            || flagged.iter().any(|s| RE_HIGH_STAKES.is_match(s));
        let severity = if high_stakes {
            Severity::High
        } else {
            Severity::Medium
        };

        Ok(vec![SafetyIssue::new(
            SafetyCategory::Misinformation,
            severity,
            self.name(),
            flagged
                .iter()
                .map(|s| format!("unsupported absolute claim: '{}'", truncate(s, 120)))
                .collect(),
        )])
    }
}
