//! Calibration store for Vigil.
//!
//! Holds historical outcome samples and per-category calibration curves.
//! The confidence estimator reads snapshots; only the reflection engine
//! records new samples.

pub mod curve;
pub mod file;
pub mod memory;
pub mod traits;

pub use curve::{bin_index, CalibrationBin, CalibrationCurve, CalibrationSample, BIN_COUNT};
pub use file::FileCalibrationStore;
pub use memory::MemoryCalibrationStore;
pub use traits::CalibrationStore;

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, VigilError};
use crate::util::call_with_timeout;

/// Result of reading a category's curve for one assessment.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationLookup {
    /// The store answered; `None` if the category has no history yet.
    Available(Option<CalibrationCurve>),
    /// The store failed or timed out.
    Unavailable(String),
}

impl CalibrationLookup {
    /// Read a snapshot under a deadline.
    ///
    /// Errors and timeouts become `Unavailable`; nothing propagates.
    pub fn fetch(
        store: &Arc<dyn CalibrationStore>,
        category: &str,
        timeout: Duration,
    ) -> CalibrationLookup {
        let store = Arc::clone(store);
        let key = category.to_string();
        let result: Option<Result<Option<CalibrationCurve>>> =
            call_with_timeout(timeout, move || store.snapshot(&key));

        let err = match result {
            Some(Ok(curve)) => return CalibrationLookup::Available(curve),
            Some(Err(e)) => e,
            None => VigilError::calibration_unavailable(format!(
                "lookup for '{}' timed out after {}ms",
                category,
                timeout.as_millis()
            )),
        };
        tracing::warn!("calibration lookup for '{}' failed: {}", category, err);
        CalibrationLookup::Unavailable(err.to_string())
    }

    /// The curve, if the store answered with one.
    pub fn curve(&self) -> Option<&CalibrationCurve> {
        match self {
            CalibrationLookup::Available(curve) => curve.as_ref(),
            CalibrationLookup::Unavailable(_) => None,
        }
    }

    /// Whether the store could not be read.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CalibrationLookup::Unavailable(_))
    }
}
