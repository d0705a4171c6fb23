//! Escalation to human oversight.
//!
//! Decides from the final assessment and safety report whether an
//! interaction must be routed to a human, then matches an expert by
//! expertise and urgency window. When no expert can be matched in time the
//! request is `blocked_pending_review`; it is never downgraded to a
//! delivery.

pub mod directory;

pub use directory::{Expert, ExpertDirectory, StaticExpertDirectory, GENERAL_EXPERTISE};

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::confidence::ConfidenceAssessment;
use crate::config::EscalationConfig;
use crate::core::{CandidateResponse, Decision};
use crate::error::{Result, VigilError};
use crate::safety::{SafetyCategory, SafetyIssue, SafetyReport, Severity};
use crate::util::{call_with_timeout, truncate};

/// Confidence below which a low-confidence escalation is medium urgency.
pub const VERY_LOW_CONFIDENCE: f64 = 0.3;

/// How quickly a human must pick the request up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl Urgency {
    /// Maximum acceptable expert response time.
    pub fn window_minutes(&self) -> u32 {
        match self {
            Urgency::High => 60,
            Urgency::Medium => 240,
            Urgency::Low => 1440,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
        }
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an interaction is escalated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum EscalationTrigger {
    LowConfidence { confidence: f64 },
    SafetyIssue {
        category: SafetyCategory,
        severity: Severity,
    },
    DomainRule { domain: String },
    UserRule { user_id: String },
}

impl EscalationTrigger {
    pub fn urgency(&self) -> Urgency {
        match self {
            EscalationTrigger::SafetyIssue { severity, .. } => {
                if *severity >= Severity::High {
                    Urgency::High
                } else {
                    Urgency::Medium
                }
            }
            EscalationTrigger::DomainRule { .. } | EscalationTrigger::UserRule { .. } => {
                Urgency::Medium
            }
            EscalationTrigger::LowConfidence { confidence } => {
                if *confidence < VERY_LOW_CONFIDENCE {
                    Urgency::Medium
                } else {
                    Urgency::Low
                }
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            EscalationTrigger::LowConfidence { confidence } => {
                format!("confidence {:.2} below floor", confidence)
            }
            EscalationTrigger::SafetyIssue { category, severity } => {
                format!("{} safety issue ({})", severity, category)
            }
            EscalationTrigger::DomainRule { domain } => {
                format!("domain '{}' always escalates", domain)
            }
            EscalationTrigger::UserRule { user_id } => {
                format!("user '{}' always escalates", user_id)
            }
        }
    }
}

/// State of an escalation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    /// An expert was assigned.
    Assigned,
    /// No expert was reachable within the urgency window.
    BlockedPendingReview,
}

/// Context prepared for the reviewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationContext {
    pub task_category: String,
    pub confidence: f64,
    pub rationale: String,
    #[serde(default)]
    pub safety_issues: Vec<SafetyIssue>,
    pub response_excerpt: String,
    #[serde(default)]
    pub correction_attempts: usize,
}

/// Terminal request handed to human oversight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationRequest {
    pub interaction_id: String,
    pub reason: String,
    pub triggers: Vec<EscalationTrigger>,
    pub required_expertise: String,
    pub urgency: Urgency,
    pub context: EscalationContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_expert: Option<String>,
    pub state: EscalationState,
    pub created_at: DateTime<Utc>,
    pub respond_by: DateTime<Utc>,
}

impl EscalationRequest {
    /// Pipeline decision for this request.
    pub fn decision(&self) -> Decision {
        match (&self.state, &self.assigned_expert) {
            (EscalationState::Assigned, Some(expert_id)) => Decision::Escalate {
                expert_id: expert_id.clone(),
            },
            _ => Decision::BlockedPendingReview,
        }
    }
}

/// Decides on and prepares escalations.
pub struct EscalationManager {
    directory: Arc<dyn ExpertDirectory>,
    config: EscalationConfig,
    severity_threshold: Severity,
}

impl EscalationManager {
    pub fn new(
        directory: Arc<dyn ExpertDirectory>,
        config: EscalationConfig,
        severity_threshold: Severity,
    ) -> Self {
        Self {
            directory,
            config,
            severity_threshold,
        }
    }

    /// Manager backed by the configured expert roster.
    pub fn from_config(config: EscalationConfig, severity_threshold: Severity) -> Self {
        let directory = Arc::new(StaticExpertDirectory::new(&config.experts));
        Self::new(directory, config, severity_threshold)
    }

    /// Every rule that requires human review. Empty means deliver.
    pub fn triggers(
        &self,
        assessment: &ConfidenceAssessment,
        safety: &SafetyReport,
        response: &CandidateResponse,
    ) -> Vec<EscalationTrigger> {
        let mut triggers = Vec::new();

        if let Some(worst) = safety.worst().filter(|i| i.severity >= self.severity_threshold) {
            triggers.push(EscalationTrigger::SafetyIssue {
                category: worst.category,
                severity: worst.severity,
            });
        }
        if let Some(domain) = self
            .config
            .always_escalate_domains
            .iter()
            .find(|d| response.has_domain(d))
        {
            triggers.push(EscalationTrigger::DomainRule {
                domain: domain.clone(),
            });
        }
        if let Some(user_id) = response
            .metadata
            .user_id
            .as_ref()
            .filter(|u| self.config.always_escalate_users.contains(u))
        {
            triggers.push(EscalationTrigger::UserRule {
                user_id: user_id.clone(),
            });
        }
        if assessment.confidence < self.config.confidence_floor {
            triggers.push(EscalationTrigger::LowConfidence {
                confidence: assessment.confidence,
            });
        }

        triggers
    }

    /// Build the request and try to assign an expert.
    pub fn escalate(
        &self,
        interaction_id: &str,
        triggers: Vec<EscalationTrigger>,
        assessment: &ConfidenceAssessment,
        safety: &SafetyReport,
        response: &CandidateResponse,
        correction_attempts: usize,
    ) -> EscalationRequest {
        let urgency = triggers
            .iter()
            .map(EscalationTrigger::urgency)
            .max()
            .unwrap_or(Urgency::Low);
        let required_expertise = required_expertise(&triggers, response);
        let reason = triggers
            .iter()
            .map(EscalationTrigger::describe)
            .collect::<Vec<_>>()
            .join("; ");

        let assigned = match self.match_expert(&required_expertise, urgency) {
            Ok(expert) => Some(expert.id),
            Err(e) => {
                tracing::warn!(
                    interaction_id = %interaction_id,
                    "escalation blocked pending review: {}",
                    e
                );
                None
            }
        };
        let state = if assigned.is_some() {
            EscalationState::Assigned
        } else {
            EscalationState::BlockedPendingReview
        };

        let created_at = Utc::now();
        tracing::info!(
            interaction_id = %interaction_id,
            urgency = %urgency,
            expertise = %required_expertise,
            expert = assigned.as_deref().unwrap_or("none"),
            "escalated: {}",
            reason
        );

        EscalationRequest {
            interaction_id: interaction_id.to_string(),
            reason,
            triggers,
            required_expertise,
            urgency,
            context: EscalationContext {
                task_category: response.metadata.task_category.clone(),
                confidence: assessment.confidence,
                rationale: assessment.rationale.clone(),
                safety_issues: safety.issues.clone(),
                response_excerpt: truncate(&response.text, 280),
                correction_attempts,
            },
            assigned_expert: assigned,
            state,
            created_at,
            respond_by: created_at + ChronoDuration::minutes(i64::from(urgency.window_minutes())),
        }
    }

    /// Fastest expert for the tag within the urgency window.
    ///
    /// Exact expertise beats generalists; ties go to the lower id.
    pub fn match_expert(&self, expertise: &str, urgency: Urgency) -> Result<Expert> {
        let directory = Arc::clone(&self.directory);
        let tag = expertise.to_string();
        let timeout = self.config.matching_timeout();
        let experts = call_with_timeout(timeout, move || directory.available_experts(&tag))
            .ok_or_else(|| {
                VigilError::escalation_unavailable(format!(
                    "expert directory did not answer within {}ms",
                    timeout.as_millis()
                ))
            })??;

        let window = urgency.window_minutes();
        experts
            .into_iter()
            .filter(|e| e.response_time_minutes <= window)
            .min_by(|a, b| {
                (!a.covers(expertise), a.response_time_minutes, &a.id).cmp(&(
                    !b.covers(expertise),
                    b.response_time_minutes,
                    &b.id,
                ))
            })
            .ok_or_else(|| {
                VigilError::escalation_unavailable(format!(
                    "no '{}' expert available within {} minutes",
                    expertise, window
                ))
            })
    }
}

fn required_expertise(triggers: &[EscalationTrigger], response: &CandidateResponse) -> String {
    for trigger in triggers {
        if let EscalationTrigger::SafetyIssue { category, .. } = trigger {
            return category.expertise().to_string();
        }
    }
    for trigger in triggers {
        if let EscalationTrigger::DomainRule { domain } = trigger {
            return domain.clone();
        }
    }
    response.metadata.task_category.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::{FactorBreakdown, Reliability};
    use crate::config::{ExpertConfig, FactorWeights};
    use std::thread;
    use std::time::Duration;

    fn assessment(confidence: f64) -> ConfidenceAssessment {
        ConfidenceAssessment {
            confidence,
            factors: FactorBreakdown {
                reported: confidence,
                coherence: confidence,
                historical: 0.5,
                uncertainty_impact: 1.0,
                weights: FactorWeights::default(),
            },
            signals: vec![],
            rationale: "test".to_string(),
            reliability: Reliability::Normal,
            history_samples: 0,
            prior_confidence: None,
            failed_detectors: vec![],
        }
    }

    fn safety(severity: Severity, category: SafetyCategory) -> SafetyReport {
        SafetyReport {
            issues: vec![SafetyIssue::new(category, severity, "test", vec![])],
            max_severity: Some(severity),
            blocked: severity == Severity::Critical,
            failed_detectors: vec![],
            complete: true,
        }
    }

    fn expert(id: &str, expertise: &str, minutes: u32) -> ExpertConfig {
        ExpertConfig {
            id: id.to_string(),
            name: id.to_string(),
            expertise: vec![expertise.to_string()],
            response_time_minutes: minutes,
            available: true,
        }
    }

    fn manager(experts: Vec<ExpertConfig>) -> EscalationManager {
        EscalationManager::from_config(
            EscalationConfig {
                experts,
                always_escalate_domains: vec!["legal".to_string()],
                always_escalate_users: vec!["vip-7".to_string()],
                ..EscalationConfig::default()
            },
            Severity::High,
        )
    }

    #[test]
    fn test_no_triggers_for_confident_safe_response() {
        let m = manager(vec![]);
        let t = m.triggers(
            &assessment(0.9),
            &SafetyReport::default(),
            &CandidateResponse::new("ok"),
        );
        assert!(t.is_empty());
    }

    #[test]
    fn test_trigger_rules() {
        let m = manager(vec![]);
        let response = CandidateResponse::new("ok")
            .with_domain_tag("legal")
            .with_user("vip-7");
        let t = m.triggers(
            &assessment(0.4),
            &safety(Severity::Medium, SafetyCategory::Privacy),
            &response,
        );
        // Medium safety is below the escalation severity
        assert_eq!(t.len(), 3);
        assert!(matches!(t[0], EscalationTrigger::DomainRule { .. }));
        assert!(matches!(t[1], EscalationTrigger::UserRule { .. }));
        assert!(matches!(t[2], EscalationTrigger::LowConfidence { .. }));
    }

    #[test]
    fn test_critical_safety_assigns_fast_expert() {
        let m = manager(vec![
            expert("slow-fair", "fairness", 45),
            expert("fast-fair", "fairness", 30),
            expert("late-fair", "fairness", 90),
            expert("gen", "general", 5),
        ]);
        let report = safety(Severity::Critical, SafetyCategory::Bias);
        let response = CandidateResponse::new("text");
        let triggers = m.triggers(&assessment(0.95), &report, &response);
        let request = m.escalate("int-1", triggers, &assessment(0.95), &report, &response, 0);

        assert_eq!(request.urgency, Urgency::High);
        assert_eq!(request.required_expertise, "fairness");
        assert_eq!(request.assigned_expert.as_deref(), Some("fast-fair"));
        assert_eq!(
            request.decision(),
            Decision::Escalate {
                expert_id: "fast-fair".to_string()
            }
        );
        assert_eq!(
            (request.respond_by - request.created_at).num_minutes(),
            60
        );
    }

    #[test]
    fn test_no_expert_in_window_blocks() {
        let m = manager(vec![expert("slow", "fairness", 90)]);
        let report = safety(Severity::High, SafetyCategory::Bias);
        let response = CandidateResponse::new("text");
        let triggers = m.triggers(&assessment(0.8), &report, &response);
        let request = m.escalate("int-2", triggers, &assessment(0.8), &report, &response, 0);

        assert_eq!(request.urgency, Urgency::High);
        assert_eq!(request.state, EscalationState::BlockedPendingReview);
        assert_eq!(request.decision(), Decision::BlockedPendingReview);
    }

    struct HangingDirectory;

    impl ExpertDirectory for HangingDirectory {
        fn available_experts(&self, _expertise: &str) -> Result<Vec<Expert>> {
            thread::sleep(Duration::from_millis(500));
            Ok(vec![])
        }
    }

    #[test]
    fn test_directory_timeout_blocks() {
        let m = EscalationManager::new(
            Arc::new(HangingDirectory),
            EscalationConfig {
                matching_timeout_ms: 20,
                ..EscalationConfig::default()
            },
            Severity::High,
        );
        let err = m.match_expert("fairness", Urgency::High).unwrap_err();
        assert!(matches!(err, VigilError::EscalationUnavailable { .. }));
    }

    #[test]
    fn test_low_confidence_urgency() {
        assert_eq!(
            EscalationTrigger::LowConfidence { confidence: 0.2 }.urgency(),
            Urgency::Medium
        );
        assert_eq!(
            EscalationTrigger::LowConfidence { confidence: 0.45 }.urgency(),
            Urgency::Low
        );
    }
}
