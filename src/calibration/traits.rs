//! Calibration storage traits for Vigil.

use std::sync::Arc;

use crate::calibration::curve::{CalibrationCurve, CalibrationSample};
use crate::error::Result;

/// Trait for calibration storage backends.
///
/// Writers are serialized per category; readers get a snapshot and never
/// observe a half-recomputed curve.
pub trait CalibrationStore: Send + Sync {
    /// Snapshot of a category's curve.
    ///
    /// Returns `Ok(None)` if the category has never been recorded.
    fn snapshot(&self, category: &str) -> Result<Option<CalibrationCurve>>;

    /// Append samples to a category and recompute its curve.
    ///
    /// Returns the updated curve.
    fn record(&self, category: &str, samples: &[CalibrationSample]) -> Result<CalibrationCurve>;

    /// Every category with a curve, sorted.
    fn categories(&self) -> Result<Vec<String>>;

    /// Samples currently held for a category.
    fn sample_count(&self, category: &str) -> Result<u32> {
        Ok(self.snapshot(category)?.map_or(0, |c| c.sample_count))
    }
}

/// Blanket implementation of CalibrationStore for Arc-wrapped stores.
///
/// Lets the monitor and the reflection worker share one store.
impl<T: CalibrationStore + ?Sized> CalibrationStore for Arc<T> {
    fn snapshot(&self, category: &str) -> Result<Option<CalibrationCurve>> {
        (**self).snapshot(category)
    }

    fn record(&self, category: &str, samples: &[CalibrationSample]) -> Result<CalibrationCurve> {
        (**self).record(category, samples)
    }

    fn categories(&self) -> Result<Vec<String>> {
        (**self).categories()
    }
}
