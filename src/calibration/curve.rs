//! Per-category calibration curves.
//!
//! A curve maps raw (reported) confidence to the accuracy historically
//! observed at that confidence. Raw confidence is bucketed into ten
//! equal-width bins; every record appends samples to a bounded window and
//! recomputes the bins from scratch.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of equal-width confidence bins.
pub const BIN_COUNT: usize = 10;

/// One observation: what was predicted and what turned out to be true.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationSample {
    /// Raw confidence reported at assessment time.
    pub predicted: f64,
    /// Observed accuracy in [0, 1].
    pub observed: f64,
    /// Interaction the sample came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl CalibrationSample {
    /// Create a sample stamped now. Values are clamped to [0, 1].
    pub fn new(predicted: f64, observed: f64) -> Self {
        Self {
            predicted: clamp_unit(predicted),
            observed: clamp_unit(observed),
            interaction_id: None,
            recorded_at: Utc::now(),
        }
    }

    /// Attach the originating interaction.
    pub fn for_interaction(mut self, interaction_id: impl Into<String>) -> Self {
        self.interaction_id = Some(interaction_id.into());
        self
    }
}

/// Aggregate for one confidence bin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u32,
    pub mean_predicted: f64,
    pub mean_observed: f64,
}

/// Calibration model for one task category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationCurve {
    pub category: String,
    pub bins: Vec<CalibrationBin>,
    /// Most recent samples, oldest first.
    pub samples: VecDeque<CalibrationSample>,
    /// Samples currently in the window.
    pub sample_count: u32,
    /// Samples ever recorded, including those aged out of the window.
    pub total_recorded: u64,
    pub updated_at: DateTime<Utc>,
}

impl CalibrationCurve {
    /// Create an empty curve.
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            bins: empty_bins(),
            samples: VecDeque::new(),
            sample_count: 0,
            total_recorded: 0,
            updated_at: Utc::now(),
        }
    }

    /// Append samples, trim to `window`, and recompute the bins.
    pub fn record(&mut self, samples: &[CalibrationSample], window: usize) {
        for sample in samples {
            self.samples.push_back(sample.clone());
            self.total_recorded += 1;
        }
        let window = window.max(1);
        while self.samples.len() > window {
            self.samples.pop_front();
        }
        self.recompute();
        self.updated_at = Utc::now();
    }

    /// Rebuild bin aggregates from the sample window.
    fn recompute(&mut self) {
        let mut bins = empty_bins();
        let mut predicted_sums = [0.0_f64; BIN_COUNT];
        let mut observed_sums = [0.0_f64; BIN_COUNT];

        for sample in &self.samples {
            let idx = bin_index(sample.predicted);
            bins[idx].count += 1;
            predicted_sums[idx] += sample.predicted;
            observed_sums[idx] += sample.observed;
        }

        for (idx, bin) in bins.iter_mut().enumerate() {
            if bin.count > 0 {
                bin.mean_predicted = predicted_sums[idx] / f64::from(bin.count);
                bin.mean_observed = observed_sums[idx] / f64::from(bin.count);
            }
        }

        self.bins = bins;
        self.sample_count = self.samples.len() as u32;
    }

    /// Observed accuracy for a raw confidence.
    ///
    /// Uses the bin holding `raw` if populated, otherwise an adjacent
    /// populated bin, otherwise the category mean. `None` when the curve
    /// has no samples.
    pub fn lookup(&self, raw: f64) -> Option<f64> {
        if self.sample_count == 0 {
            return None;
        }

        let idx = bin_index(raw);
        if self.bins[idx].count > 0 {
            return Some(self.bins[idx].mean_observed);
        }

        let neighbours = [idx.checked_sub(1), Some(idx + 1).filter(|i| *i < BIN_COUNT)];
        let best = neighbours
            .iter()
            .flatten()
            .map(|i| &self.bins[*i])
            .filter(|b| b.count > 0)
            .max_by_key(|b| b.count);
        if let Some(bin) = best {
            return Some(bin.mean_observed);
        }

        self.mean_observed()
    }

    /// Mean observed accuracy across the window.
    pub fn mean_observed(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().map(|s| s.observed).sum::<f64>() / self.samples.len() as f64)
    }

    /// Mean predicted confidence across the window.
    pub fn mean_predicted(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().map(|s| s.predicted).sum::<f64>() / self.samples.len() as f64)
    }

    /// Expected calibration error: count-weighted mean |predicted - observed|.
    pub fn expected_calibration_error(&self) -> Option<f64> {
        if self.sample_count == 0 {
            return None;
        }
        let total = f64::from(self.sample_count);
        Some(
            self.bins
                .iter()
                .filter(|b| b.count > 0)
                .map(|b| f64::from(b.count) / total * (b.mean_predicted - b.mean_observed).abs())
                .sum(),
        )
    }

    /// Positive when the category is overconfident on average.
    pub fn overconfidence(&self) -> Option<f64> {
        Some(self.mean_predicted()? - self.mean_observed()?)
    }
}

/// Bin index for a raw confidence (1.0 lands in the top bin).
pub fn bin_index(raw: f64) -> usize {
    let raw = clamp_unit(raw);
    ((raw * BIN_COUNT as f64).floor() as usize).min(BIN_COUNT - 1)
}

fn empty_bins() -> Vec<CalibrationBin> {
    (0..BIN_COUNT)
        .map(|i| CalibrationBin {
            lower: i as f64 / BIN_COUNT as f64,
            upper: (i + 1) as f64 / BIN_COUNT as f64,
            count: 0,
            mean_predicted: 0.0,
            mean_observed: 0.0,
        })
        .collect()
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
