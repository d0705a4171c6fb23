//! Interaction state types for Vigil.
//!
//! These types represent the runtime state of one monitored interaction:
//! its lifecycle status, the recorded transitions, and the final decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-interaction state, mutated only through [`crate::core::Lifecycle`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionState {
    /// Identifier supplied by the pipeline.
    pub interaction_id: String,
    /// Current lifecycle status.
    pub status: InteractionStatus,
    /// Correction attempts started so far.
    pub correction_attempts: u32,
    /// Every status change, in order.
    pub transitions: Vec<Transition>,
}

impl InteractionState {
    /// Create a fresh interaction in the assessing state.
    pub fn new(interaction_id: impl Into<String>) -> Self {
        Self {
            interaction_id: interaction_id.into(),
            status: InteractionStatus::Assessing,
            correction_attempts: 0,
            transitions: Vec::new(),
        }
    }
}

/// Lifecycle status of an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    /// Confidence and safety are being evaluated.
    #[default]
    Assessing,
    /// A correction strategy is being applied.
    Correcting,
    /// An expert is being matched.
    Escalating,
    /// The response was released to the pipeline.
    Completed,
    /// The interaction was handed to human oversight.
    Escalated,
    /// The interaction was cancelled before a decision.
    Deferred,
}

impl InteractionStatus {
    /// Check if the interaction is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InteractionStatus::Completed | InteractionStatus::Escalated | InteractionStatus::Deferred
        )
    }

    /// Whether a terminal interaction should be reflected upon.
    pub fn is_reflectable(&self) -> bool {
        matches!(
            self,
            InteractionStatus::Completed | InteractionStatus::Escalated
        )
    }

    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionStatus::Assessing => "assessing",
            InteractionStatus::Correcting => "correcting",
            InteractionStatus::Escalating => "escalating",
            InteractionStatus::Completed => "completed",
            InteractionStatus::Escalated => "escalated",
            InteractionStatus::Deferred => "deferred",
        }
    }
}

impl std::fmt::Display for InteractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded status change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transition {
    pub from: InteractionStatus,
    pub to: InteractionStatus,
    pub at: DateTime<Utc>,
}

/// What the pipeline should do with the response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Deliver the response, with a disclosure when confidence stayed low.
    Deliver {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disclosure: Option<String>,
    },
    /// Withhold the response; an expert has been assigned.
    Escalate { expert_id: String },
    /// Withhold the response; no expert was reachable.
    BlockedPendingReview,
    /// The interaction was cancelled.
    Deferred,
}

impl Decision {
    /// Whether the response may be shown to the user.
    pub fn releases_response(&self) -> bool {
        matches!(self, Decision::Deliver { .. })
    }

    /// Short name used in logs and CLI output.
    pub fn name(&self) -> &'static str {
        match self {
            Decision::Deliver { .. } => "deliver",
            Decision::Escalate { .. } => "escalate",
            Decision::BlockedPendingReview => "blocked_pending_review",
            Decision::Deferred => "deferred",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_interaction_is_assessing() {
        let state = InteractionState::new("int-1");
        assert_eq!(state.status, InteractionStatus::Assessing);
        assert_eq!(state.correction_attempts, 0);
        assert!(state.transitions.is_empty());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(InteractionStatus::Completed.is_terminal());
        assert!(InteractionStatus::Escalated.is_terminal());
        assert!(InteractionStatus::Deferred.is_terminal());
        assert!(!InteractionStatus::Assessing.is_terminal());
        assert!(!InteractionStatus::Correcting.is_terminal());
        assert!(!InteractionStatus::Escalating.is_terminal());
    }

    #[test]
    fn test_deferred_not_reflectable() {
        assert!(InteractionStatus::Completed.is_reflectable());
        assert!(InteractionStatus::Escalated.is_reflectable());
        assert!(!InteractionStatus::Deferred.is_reflectable());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&InteractionStatus::Escalating).unwrap();
        assert_eq!(json, "\"escalating\"");
        assert_eq!(InteractionStatus::Deferred.to_string(), "deferred");
    }

    #[test]
    fn test_decision_serialization() {
        let json = serde_json::to_string(&Decision::Deliver { disclosure: None }).unwrap();
        assert_eq!(json, r#"{"decision":"deliver"}"#);

        let json = serde_json::to_string(&Decision::BlockedPendingReview).unwrap();
        assert_eq!(json, r#"{"decision":"blocked_pending_review"}"#);

        let decision: Decision =
            serde_json::from_str(r#"{"decision":"escalate","expert_id":"dr-lee"}"#).unwrap();
        assert_eq!(
            decision,
            Decision::Escalate {
                expert_id: "dr-lee".to_string()
            }
        );
        assert!(!decision.releases_response());
    }
}
