//! Vigil - meta-cognitive self-monitoring for agent pipelines.
//!
//! Vigil sits above an agent's perceive-reason-act loop. For every
//! candidate response it estimates a calibrated confidence, detects typed
//! uncertainty, screens for safety issues, attempts bounded self-correction,
//! escalates to human experts when needed, and reflects on closed
//! interactions to keep its calibration honest.

pub mod calibration;
pub mod cli;
pub mod confidence;
pub mod config;
pub mod core;
pub mod correct;
pub mod detect;
pub mod error;
pub mod escalation;
pub mod events;
pub mod journal;
pub mod monitor;
pub mod reflect;
pub mod safety;
pub mod util;

pub use calibration::{
    CalibrationCurve, CalibrationLookup, CalibrationSample, CalibrationStore,
    FileCalibrationStore, MemoryCalibrationStore,
};
pub use confidence::{ConfidenceAssessment, ConfidenceEstimator, FactorBreakdown, Reliability};
pub use config::Config;
pub use core::{
    CancellationToken, CandidateResponse, Decision, InteractionState, InteractionStatus,
    Lifecycle, ReasoningMethod, ReasoningStep, ReasoningTrace, ResponseMetadata, ToolInvocation,
};
pub use correct::{
    CorrectionAction, CorrectionCoordinator, CorrectionOutcome, CorrectionStrategy, Evaluation,
    IssueKind, Reasoner, Regeneration, RegenerationRequest,
};
pub use detect::{
    DetectionReport, UncertaintyDetector, UncertaintySignal, UncertaintyStrategy, UncertaintyType,
};
pub use error::{Result, VigilError};
pub use escalation::{
    EscalationManager, EscalationRequest, EscalationTrigger, Expert, ExpertDirectory,
    StaticExpertDirectory, Urgency,
};
pub use events::{EventLog, MonitorEvent, EVENT_SCHEMA_VERSION};
pub use monitor::{AssessmentOutcome, AssessmentRequest, Monitor};
pub use reflect::{
    ReflectionEngine, ReflectionJob, ReflectionLog, ReflectionPolicy, ReflectionRecord,
    ReflectionScheduler,
};
pub use safety::{
    SafetyCategory, SafetyDetector, SafetyIssue, SafetyMonitor, SafetyReport, Severity,
};

// CLI commands
pub use cli::{AssessCommand, CalibrationCommand, InitCommand, ReflectionsCommand};
