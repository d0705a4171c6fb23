//! Logical uncertainty: contradictions, missing links, circular justification.

use std::collections::BTreeSet;

use crate::core::{CandidateResponse, ReasoningTrace};
use crate::detect::{noisy_or, Detection, UncertaintyStrategy, UncertaintyType};
use crate::error::Result;
use crate::util::{content_terms, sentences, tokenize};

/// Confidence drop between consecutive steps that counts as a broken link.
pub const CONFIDENCE_DROP: f64 = 0.4;

const CONTRADICTION_WEIGHT: f64 = 0.7;
const GAP_WEIGHT: f64 = 0.35;
const CIRCULAR_WEIGHT: f64 = 0.6;

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "none", "isn't", "aren't", "wasn't", "weren't", "doesn't", "don't",
    "didn't", "cannot", "can't", "won't", "shouldn't", "false", "neither", "nor",
];

/// A sentence reduced to its polarity and content terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Statement {
    pub negated: bool,
    pub terms: BTreeSet<String>,
}

/// Normalize a sentence: strip negation words, remember polarity.
pub(crate) fn statement(sentence: &str) -> Statement {
    let negations = tokenize(sentence)
        .iter()
        .filter(|t| NEGATIONS.contains(&t.as_str()))
        .count();
    let terms = content_terms(sentence)
        .into_iter()
        .filter(|t| !NEGATIONS.contains(&t.as_str()))
        .collect();
    Statement {
        negated: negations % 2 == 1,
        terms,
    }
}

/// Pairs of steps whose statements assert and deny the same content.
pub(crate) fn contradictions(trace: &ReasoningTrace) -> Vec<(usize, usize, String)> {
    let statements: Vec<(usize, &str, Statement)> = trace
        .steps
        .iter()
        .flat_map(|step| {
            sentences(&step.output)
                .into_iter()
                .map(move |s| (step.index, s, statement(s)))
        })
        .filter(|(_, _, st)| st.terms.len() >= 2)
        .collect();

    let mut found = Vec::new();
    for (i, (step_a, text_a, a)) in statements.iter().enumerate() {
        for (step_b, text_b, b) in statements.iter().skip(i + 1) {
            if step_a != step_b && a.terms == b.terms && a.negated != b.negated {
                found.push((
                    *step_a,
                    *step_b,
                    format!("'{}' vs '{}'", text_a, text_b),
                ));
            }
        }
    }
    found
}

/// Detects internal inconsistency in the reasoning chain.
#[derive(Debug, Default)]
pub struct LogicalStrategy;

impl LogicalStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl UncertaintyStrategy for LogicalStrategy {
    fn name(&self) -> &'static str {
        "logical"
    }

    fn uncertainty_type(&self) -> UncertaintyType {
        UncertaintyType::Logical
    }

    fn detect(
        &self,
        trace: &ReasoningTrace,
        _response: &CandidateResponse,
    ) -> Result<Option<Detection>> {
        let mut evidence = Vec::new();
        let mut components = Vec::new();

        for (a, b, detail) in contradictions(trace) {
            evidence.push(format!("steps {} and {} contradict: {}", a, b, detail));
            components.push(CONTRADICTION_WEIGHT);
        }

        // Missing inferential links
        let mut known: BTreeSet<String> = trace
            .steps
            .first()
            .map(|s| content_terms(&s.input).into_iter().collect())
            .unwrap_or_default();
        for pair in trace.steps.windows(2) {
            let (prev, step) = (&pair[0], &pair[1]);
            known.extend(content_terms(&prev.output));

            let input_terms = content_terms(&step.input);
            if !input_terms.is_empty() && !input_terms.iter().any(|t| known.contains(t)) {
                evidence.push(format!(
                    "step {} input shares nothing with earlier steps",
                    step.index
                ));
                components.push(GAP_WEIGHT);
            }

            let drop = prev.confidence - step.confidence;
            if drop > CONFIDENCE_DROP {
                evidence.push(format!(
                    "confidence drops {:.2} -> {:.2} between steps {} and {}",
                    prev.confidence, step.confidence, prev.index, step.index
                ));
                components.push(GAP_WEIGHT);
            }
        }

        // Circular justification: the conclusion is used as a premise before
        // it is derived (the original question does not count).
        if trace.steps.len() >= 3 {
            let last = &trace.steps[trace.steps.len() - 1];
            let conclusion: BTreeSet<String> = content_terms(&last.output).into_iter().collect();
            let question: BTreeSet<String> =
                content_terms(&trace.steps[0].input).into_iter().collect();
            if conclusion.len() >= 2 && !conclusion.is_subset(&question) {
                let premise = trace.steps[1..trace.steps.len() - 1].iter().find(|step| {
                    let input: BTreeSet<String> = content_terms(&step.input).into_iter().collect();
                    conclusion.is_subset(&input)
                });
                if let Some(step) = premise {
                    evidence.push(format!(
                        "conclusion of step {} is assumed as a premise at step {}",
                        last.index, step.index
                    ));
                    components.push(CIRCULAR_WEIGHT);
                }
            }
        }

        if components.is_empty() {
            return Ok(None);
        }

        Ok(Some(Detection::new(
            noisy_or(components),
            evidence,
            "regenerate with explicit consistency constraints between the conflicting steps",
        )))
    }
}
