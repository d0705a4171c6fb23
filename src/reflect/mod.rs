//! Post-interaction reflection.
//!
//! After an interaction reaches `completed` or `escalated`, a reflection job
//! is handed to the scheduler. The engine analyzes outcome achievement,
//! process quality, alternative paths and recurring patterns, appends a
//! [`ReflectionRecord`] to the reflection log, and feeds calibration
//! samples back into the calibration store. Reflection never runs inside
//! the synchronous assessment path.

pub mod engine;
pub mod log;
pub mod scheduler;

pub use engine::ReflectionEngine;
pub use log::ReflectionLog;
pub use scheduler::ReflectionScheduler;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::confidence::ConfidenceAssessment;
use crate::core::{CandidateResponse, InteractionStatus, ReasoningMethod, ReasoningTrace};
use crate::correct::CorrectionAction;
use crate::safety::SafetyIssue;

/// When queued reflection jobs are processed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReflectionPolicy {
    /// Reflect each job as soon as it arrives.
    Immediate,
    /// Reflect routine jobs in batches of `batch_size`.
    Batched { batch_size: usize },
    /// Reflect a deterministic fraction of routine jobs.
    Sampled { rate: f64 },
}

impl ReflectionPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            ReflectionPolicy::Immediate => "immediate",
            ReflectionPolicy::Batched { .. } => "batched",
            ReflectionPolicy::Sampled { .. } => "sampled",
        }
    }
}

/// Everything reflection needs about one closed interaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReflectionJob {
    pub interaction_id: String,
    pub task_category: String,
    pub status: InteractionStatus,
    pub trace: ReasoningTrace,
    pub response: CandidateResponse,
    pub assessment: ConfidenceAssessment,
    #[serde(default)]
    pub safety_issues: Vec<SafetyIssue>,
    #[serde(default)]
    pub corrections: Vec<CorrectionAction>,
    /// Correction ran out of attempts.
    #[serde(default)]
    pub exhausted: bool,
    /// Goals declared by the pipeline for this interaction.
    #[serde(default)]
    pub goals: Vec<String>,
    /// External outcome feedback in [0, 1], if any.
    #[serde(default)]
    pub feedback_score: Option<f64>,
    pub closed_at: DateTime<Utc>,
}

impl ReflectionJob {
    /// Escalated and exhausted interactions skip batching and sampling.
    pub fn is_urgent(&self) -> bool {
        self.status == InteractionStatus::Escalated || self.exhausted
    }
}

/// Process quality sub-scores and their weighted total.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessQuality {
    pub logical_consistency: f64,
    pub completeness: f64,
    pub information_usage: f64,
    pub depth: f64,
    pub score: f64,
}

/// A path the interaction could have taken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlternativePath {
    pub description: String,
    /// "step N" for alternatives in the trace, "history" for methods that did
    /// better in similar interactions.
    pub source: String,
    pub estimated_quality: f64,
}

/// A calibration sample derived from the reflection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationAdjustment {
    pub category: String,
    pub predicted: f64,
    pub observed: f64,
}

/// Append-only result of reflecting on one interaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReflectionRecord {
    pub interaction_id: String,
    pub task_category: String,
    pub status: InteractionStatus,
    pub outcome_score: f64,
    pub process: ProcessQuality,
    #[serde(default)]
    pub alternatives: Vec<AlternativePath>,
    /// Issue tags observed in this interaction (e.g. "uncertainty:factual").
    #[serde(default)]
    pub issues: Vec<String>,
    /// Issue tags recurring across the category's recent window.
    #[serde(default)]
    pub recurring_issues: Vec<String>,
    #[serde(default)]
    pub calibration_adjustments: Vec<CalibrationAdjustment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dominant_method: Option<ReasoningMethod>,
    pub reported_confidence: f64,
    pub assessed_confidence: f64,
    pub reflected_at: DateTime<Utc>,
}
