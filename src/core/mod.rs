//! Core types and logic for Vigil.
//!
//! This module contains the reasoning trace model consumed from the agent
//! pipeline, the per-interaction state, and the lifecycle state machine.

pub mod cancel;
pub mod lifecycle;
pub mod state;
pub mod trace;

pub use cancel::CancellationToken;
pub use lifecycle::Lifecycle;
pub use state::{Decision, InteractionState, InteractionStatus, Transition};
pub use trace::{
    CandidateResponse, ReasoningMethod, ReasoningStep, ReasoningTrace, ResponseMetadata,
    StepAlternative, ToolInvocation, DEFAULT_TASK_CATEGORY,
};
