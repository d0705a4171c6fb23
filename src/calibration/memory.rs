//! In-memory calibration storage backed by DashMap.
//!
//! Used in tests and by embedders that keep calibration elsewhere. All data
//! is lost on process exit.

use dashmap::DashMap;

use crate::calibration::curve::{CalibrationCurve, CalibrationSample};
use crate::calibration::CalibrationStore;
use crate::error::Result;

/// Concurrent in-memory calibration store.
#[derive(Debug)]
pub struct MemoryCalibrationStore {
    curves: DashMap<String, CalibrationCurve>,
    window: usize,
}

impl MemoryCalibrationStore {
    /// Create an empty store keeping `window` samples per category.
    pub fn new(window: usize) -> Self {
        Self {
            curves: DashMap::new(),
            window,
        }
    }

    /// Number of categories.
    pub fn len(&self) -> usize {
        self.curves.len()
    }

    /// Whether no category has been recorded.
    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }
}

impl Default for MemoryCalibrationStore {
    fn default() -> Self {
        Self::new(500)
    }
}

impl CalibrationStore for MemoryCalibrationStore {
    fn snapshot(&self, category: &str) -> Result<Option<CalibrationCurve>> {
        Ok(self.curves.get(category).map(|c| c.value().clone()))
    }

    fn record(&self, category: &str, samples: &[CalibrationSample]) -> Result<CalibrationCurve> {
        // The entry guard holds the shard lock for the whole append+recompute.
        let mut curve = self
            .curves
            .entry(category.to_string())
            .or_insert_with(|| CalibrationCurve::new(category));
        curve.record(samples, self.window);
        Ok(curve.clone())
    }

    fn categories(&self) -> Result<Vec<String>> {
        let mut categories: Vec<String> = self.curves.iter().map(|e| e.key().clone()).collect();
        categories.sort();
        Ok(categories)
    }
}
