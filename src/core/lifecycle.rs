//! Interaction lifecycle state machine.
//!
//! `assessing -> {correcting -> assessing}* -> {escalating -> escalated | completed}`,
//! with `deferred` reachable from any non-terminal state on cancellation.
//! All state mutations go through [`Lifecycle`].

use chrono::Utc;

use crate::core::state::{InteractionState, InteractionStatus, Transition};
use crate::error::{Result, VigilError};

/// Lifecycle manager for one interaction.
#[derive(Debug)]
pub struct Lifecycle<'a> {
    state: &'a mut InteractionState,
    max_attempts: u32,
}

impl<'a> Lifecycle<'a> {
    /// Create a lifecycle manager enforcing `max_attempts` corrections.
    pub fn new(state: &'a mut InteractionState, max_attempts: u32) -> Self {
        Self {
            state,
            max_attempts,
        }
    }

    /// Current status.
    pub fn status(&self) -> InteractionStatus {
        self.state.status
    }

    /// Check if the interaction has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.status.is_terminal()
    }

    /// Correction attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.state.correction_attempts
    }

    /// Whether another correction attempt is allowed.
    pub fn can_correct(&self) -> bool {
        self.state.status == InteractionStatus::Assessing
            && self.state.correction_attempts < self.max_attempts
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Transition: Assessing → Correcting
    ///
    /// Fails once the attempt budget is spent.
    pub fn begin_correction(&mut self) -> Result<u32> {
        self.require(InteractionStatus::Assessing, "begin correction")?;
        if self.state.correction_attempts >= self.max_attempts {
            return Err(VigilError::invalid_state(format!(
                "correction budget of {} attempts exhausted",
                self.max_attempts
            )));
        }

        self.state.correction_attempts += 1;
        self.move_to(InteractionStatus::Correcting);
        Ok(self.state.correction_attempts)
    }

    /// Transition: Correcting → Assessing (re-assess the corrected response)
    pub fn finish_correction(&mut self) -> Result<()> {
        self.require(InteractionStatus::Correcting, "finish correction")?;
        self.move_to(InteractionStatus::Assessing);
        Ok(())
    }

    /// Transition: Assessing → Escalating
    pub fn begin_escalation(&mut self) -> Result<()> {
        self.require(InteractionStatus::Assessing, "begin escalation")?;
        self.move_to(InteractionStatus::Escalating);
        Ok(())
    }

    /// Transition: Escalating → Escalated
    pub fn mark_escalated(&mut self) -> Result<()> {
        self.require(InteractionStatus::Escalating, "mark escalated")?;
        self.move_to(InteractionStatus::Escalated);
        Ok(())
    }

    /// Transition: Assessing → Completed
    pub fn complete(&mut self) -> Result<()> {
        self.require(InteractionStatus::Assessing, "complete")?;
        self.move_to(InteractionStatus::Completed);
        Ok(())
    }

    /// Transition: any non-terminal → Deferred
    pub fn defer(&mut self) -> Result<()> {
        if self.is_terminal() {
            return Err(VigilError::invalid_state(format!(
                "Cannot defer in {} state",
                self.state.status
            )));
        }
        self.move_to(InteractionStatus::Deferred);
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn require(&self, expected: InteractionStatus, action: &str) -> Result<()> {
        if self.state.status != expected {
            return Err(VigilError::invalid_state(format!(
                "Cannot {} in {} state",
                action, self.state.status
            )));
        }
        Ok(())
    }

    fn move_to(&mut self, to: InteractionStatus) {
        let from = self.state.status;
        self.state.transitions.push(Transition {
            from,
            to,
            at: Utc::now(),
        });
        self.state.status = to;
        tracing::debug!(
            interaction_id = %self.state.interaction_id,
            "{} -> {}",
            from,
            to
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_completes() {
        let mut state = InteractionState::new("int-1");
        let mut lifecycle = Lifecycle::new(&mut state, 2);

        lifecycle.complete().unwrap();
        assert_eq!(lifecycle.status(), InteractionStatus::Completed);
        assert!(lifecycle.is_terminal());
        assert_eq!(state.transitions.len(), 1);
    }

    #[test]
    fn test_correction_loop_then_complete() {
        let mut state = InteractionState::new("int-1");
        let mut lifecycle = Lifecycle::new(&mut state, 2);

        assert_eq!(lifecycle.begin_correction().unwrap(), 1);
        lifecycle.finish_correction().unwrap();
        assert_eq!(lifecycle.begin_correction().unwrap(), 2);
        lifecycle.finish_correction().unwrap();
        assert!(!lifecycle.can_correct());
        assert!(lifecycle.begin_correction().is_err());
        lifecycle.complete().unwrap();

        let path: Vec<_> = state.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![
                InteractionStatus::Correcting,
                InteractionStatus::Assessing,
                InteractionStatus::Correcting,
                InteractionStatus::Assessing,
                InteractionStatus::Completed,
            ]
        );
    }

    #[test]
    fn test_escalation_path() {
        let mut state = InteractionState::new("int-1");
        let mut lifecycle = Lifecycle::new(&mut state, 2);

        lifecycle.begin_escalation().unwrap();
        assert!(lifecycle.complete().is_err());
        lifecycle.mark_escalated().unwrap();
        assert_eq!(state.status, InteractionStatus::Escalated);
    }

    #[test]
    fn test_cannot_escalate_while_correcting() {
        let mut state = InteractionState::new("int-1");
        let mut lifecycle = Lifecycle::new(&mut state, 2);

        lifecycle.begin_correction().unwrap();
        let err = lifecycle.begin_escalation().unwrap_err();
        assert!(err.to_string().contains("correcting"));
    }

    #[test]
    fn test_defer_from_correcting() {
        let mut state = InteractionState::new("int-1");
        let mut lifecycle = Lifecycle::new(&mut state, 2);

        lifecycle.begin_correction().unwrap();
        lifecycle.defer().unwrap();
        assert_eq!(lifecycle.status(), InteractionStatus::Deferred);
        assert!(lifecycle.defer().is_err());
    }

    #[test]
    fn test_zero_budget_never_corrects() {
        let mut state = InteractionState::new("int-1");
        let mut lifecycle = Lifecycle::new(&mut state, 0);
        assert!(!lifecycle.can_correct());
        assert!(lifecycle.begin_correction().is_err());
        assert_eq!(state.status, InteractionStatus::Assessing);
    }

    // =========================================================================
    // Property-based tests
    // =========================================================================

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone, Copy)]
        enum Step {
            BeginCorrection,
            FinishCorrection,
            BeginEscalation,
            MarkEscalated,
            Complete,
            Defer,
        }

        fn arb_step() -> impl Strategy<Value = Step> {
            prop_oneof![
                Just(Step::BeginCorrection),
                Just(Step::FinishCorrection),
                Just(Step::BeginEscalation),
                Just(Step::MarkEscalated),
                Just(Step::Complete),
                Just(Step::Defer),
            ]
        }

        fn apply(lifecycle: &mut Lifecycle<'_>, step: Step) -> Result<()> {
            match step {
                Step::BeginCorrection => lifecycle.begin_correction().map(|_| ()),
                Step::FinishCorrection => lifecycle.finish_correction(),
                Step::BeginEscalation => lifecycle.begin_escalation(),
                Step::MarkEscalated => lifecycle.mark_escalated(),
                Step::Complete => lifecycle.complete(),
                Step::Defer => lifecycle.defer(),
            }
        }

        proptest! {
            // Property: correction attempts never exceed the budget
            #[test]
            fn prop_attempts_bounded(
                steps in prop::collection::vec(arb_step(), 0..40),
                max_attempts in 0u32..5,
            ) {
                let mut state = InteractionState::new("int-p");
                let mut lifecycle = Lifecycle::new(&mut state, max_attempts);
                for step in steps {
                    let _ = apply(&mut lifecycle, step);
                }
                prop_assert!(state.correction_attempts <= max_attempts);
            }

            // Property: nothing leaves a terminal state
            #[test]
            fn prop_terminal_is_absorbing(
                steps in prop::collection::vec(arb_step(), 0..40),
            ) {
                let mut state = InteractionState::new("int-p");
                let mut lifecycle = Lifecycle::new(&mut state, 2);
                let mut terminal = None;
                for step in steps {
                    let result = apply(&mut lifecycle, step);
                    if let Some(t) = terminal {
                        prop_assert!(result.is_err());
                        prop_assert_eq!(lifecycle.status(), t);
                    } else if lifecycle.is_terminal() {
                        terminal = Some(lifecycle.status());
                    }
                }
            }

            // Property: the transition log chains from status to status
            #[test]
            fn prop_transitions_chain(
                steps in prop::collection::vec(arb_step(), 0..40),
            ) {
                let mut state = InteractionState::new("int-p");
                {
                    let mut lifecycle = Lifecycle::new(&mut state, 2);
                    for step in steps {
                        let _ = apply(&mut lifecycle, step);
                    }
                }
                let mut current = InteractionStatus::Assessing;
                for t in &state.transitions {
                    prop_assert_eq!(t.from, current);
                    current = t.to;
                }
                prop_assert_eq!(current, state.status);
            }
        }
    }
}
