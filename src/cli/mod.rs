//! CLI commands for Vigil.
//!
//! - **Pipeline command**: assess (one interaction through the monitor)
//! - **Inspection commands**: calibration, reflections
//! - **Utility commands**: init

// Pipeline command
pub mod assess;

// Inspection commands
pub mod calibration;
pub mod reflections;

// Utility commands
pub mod init;

pub use assess::AssessCommand;
pub use calibration::CalibrationCommand;
pub use init::InitCommand;
pub use reflections::ReflectionsCommand;
