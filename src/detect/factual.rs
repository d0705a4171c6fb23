//! Factual uncertainty: unsupported claims, time-sensitive claims and
//! contradicting evidence.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::{CandidateResponse, ReasoningTrace};
use crate::detect::{noisy_or, Detection, UncertaintyStrategy, UncertaintyType};
use crate::error::Result;
use crate::util::{content_terms, sentences};

static RE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:[.,]\d+)*%?").unwrap());

static RE_ASSERTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(always|never|definitely|certainly|proven|in fact|according to|studies show|research shows|it is known|is the|was the|are the|were the)\b",
    )
    .unwrap()
});

static RE_TIME_SENSITIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(currently|today|this year|this week|latest|right now|as of|at the moment|recent|nowadays)\b")
        .unwrap()
});

/// Contribution of each unsupported claim.
pub const UNSUPPORTED_RATE: f64 = 0.5;

const TIME_SENSITIVE_WEIGHT: f64 = 0.25;
const CONFLICT_WEIGHT: f64 = 0.6;

/// Whether a sentence makes a checkable factual claim.
pub(crate) fn is_claim(sentence: &str) -> bool {
    RE_NUMBER.is_match(sentence) || RE_ASSERTIVE.is_match(sentence)
}

fn numbers(text: &str) -> BTreeSet<String> {
    RE_NUMBER
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches('%').replace(',', ""))
        .collect()
}

fn anchor_terms(text: &str) -> BTreeSet<String> {
    content_terms(text)
        .into_iter()
        .filter(|t| !t.chars().any(|c| c.is_ascii_digit()))
        .collect()
}

/// Whether any evidence output backs the claim.
///
/// Figures in the claim must all appear in one evidence output; claims
/// without figures need two shared content terms (one for very short
/// claims).
pub(crate) fn is_supported(claim: &str, evidence_outputs: &[&str]) -> bool {
    let claim_numbers = numbers(claim);
    let claim_terms = anchor_terms(claim);
    let needed = claim_terms.len().min(2);

    evidence_outputs.iter().any(|output| {
        if !claim_numbers.is_empty() {
            return claim_numbers.is_subset(&numbers(output));
        }
        let output_terms = anchor_terms(output);
        claim_terms.intersection(&output_terms).count() >= needed.max(1)
    })
}

/// Outputs of evidence steps, excluding failed tool calls.
pub(crate) fn evidence_outputs(trace: &ReasoningTrace) -> Vec<&str> {
    trace
        .evidence_steps()
        .filter(|s| s.tool.as_ref().is_none_or(|t| t.succeeded))
        .map(|s| s.output.as_str())
        .collect()
}

/// Detects claims the trace cannot back up.
#[derive(Debug, Default)]
pub struct FactualStrategy;

impl FactualStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl UncertaintyStrategy for FactualStrategy {
    fn name(&self) -> &'static str {
        "factual"
    }

    fn uncertainty_type(&self) -> UncertaintyType {
        UncertaintyType::Factual
    }

    fn detect(
        &self,
        trace: &ReasoningTrace,
        response: &CandidateResponse,
    ) -> Result<Option<Detection>> {
        let evidence_outputs = evidence_outputs(trace);

        let mut evidence = Vec::new();
        let mut components = Vec::new();

        for claim in sentences(&response.text).into_iter().filter(|s| is_claim(s)) {
            if !is_supported(claim, &evidence_outputs) {
                evidence.push(format!("unsupported claim: '{}'", claim));
                components.push(UNSUPPORTED_RATE);
            }
            if RE_TIME_SENSITIVE.is_match(claim) {
                let weight = if evidence_outputs.is_empty() {
                    TIME_SENSITIVE_WEIGHT
                } else {
                    TIME_SENSITIVE_WEIGHT / 2.0
                };
                evidence.push(format!("time-sensitive claim: '{}'", claim));
                components.push(weight);
            }
        }

        // Evidence steps that give different figures for the same subject
        let facts: Vec<(usize, BTreeSet<String>, BTreeSet<String>)> = trace
            .evidence_steps()
            .flat_map(|step| {
                sentences(&step.output)
                    .into_iter()
                    .map(move |s| (step.index, anchor_terms(s), numbers(s)))
            })
            .filter(|(_, anchors, nums)| anchors.len() >= 2 && !nums.is_empty())
            .collect();
        for (i, (step_a, anchors_a, nums_a)) in facts.iter().enumerate() {
            for (step_b, anchors_b, nums_b) in facts.iter().skip(i + 1) {
                let shared = anchors_a.intersection(anchors_b).count();
                if step_a != step_b && shared >= 2 && nums_a.is_disjoint(nums_b) {
                    evidence.push(format!(
                        "evidence from steps {} and {} disagrees on figures",
                        step_a, step_b
                    ));
                    components.push(CONFLICT_WEIGHT);
                }
            }
        }

        if components.is_empty() {
            return Ok(None);
        }

        Ok(Some(Detection::new(
            noisy_or(components),
            evidence,
            "verify against an authoritative source or state the limitation",
        )))
    }
}
