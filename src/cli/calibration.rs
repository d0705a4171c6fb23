//! Calibration command for Vigil.
//!
//! Shows the per-category calibration curves.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationCurve, CalibrationStore};

/// Options for the calibration command.
#[derive(Debug, Clone, Default)]
pub struct CalibrationOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// Show a single category with its bins.
    pub category: Option<String>,
}

/// Summary of one category's curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveInfo {
    pub category: String,
    pub sample_count: u32,
    pub total_recorded: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_predicted: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_observed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_error: Option<f64>,
    /// Populated bins as (lower, upper, count, mean observed).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bins: Vec<(f64, f64, u32, f64)>,
    pub updated: String,
}

impl CurveInfo {
    fn from_curve(curve: &CalibrationCurve, with_bins: bool) -> Self {
        let bins = if with_bins {
            curve
                .bins
                .iter()
                .filter(|b| b.count > 0)
                .map(|b| (b.lower, b.upper, b.count, b.mean_observed))
                .collect()
        } else {
            Vec::new()
        };
        Self {
            category: curve.category.clone(),
            sample_count: curve.sample_count,
            total_recorded: curve.total_recorded,
            mean_predicted: curve.mean_predicted(),
            mean_observed: curve.mean_observed(),
            calibration_error: curve.expected_calibration_error(),
            bins,
            updated: curve.updated_at.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

/// Output format for the calibration command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationOutput {
    pub success: bool,
    pub curves: Vec<CurveInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CalibrationOutput {
    pub fn success(curves: Vec<CurveInfo>) -> Self {
        Self {
            success: true,
            curves,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            curves: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// The calibration command implementation.
pub struct CalibrationCommand {
    store: Arc<dyn CalibrationStore>,
}

impl CalibrationCommand {
    pub fn new(store: Arc<dyn CalibrationStore>) -> Self {
        Self { store }
    }

    /// Run the calibration command.
    pub fn run(&self, options: &CalibrationOptions) -> CalibrationOutput {
        let categories = match &options.category {
            Some(c) => vec![c.clone()],
            None => match self.store.categories() {
                Ok(c) => c,
                Err(e) => return CalibrationOutput::failure(e.to_string()),
            },
        };

        let mut curves = Vec::new();
        for category in &categories {
            match self.store.snapshot(category) {
                Ok(Some(curve)) => {
                    curves.push(CurveInfo::from_curve(&curve, options.category.is_some()))
                }
                Ok(None) => {}
                Err(e) => return CalibrationOutput::failure(e.to_string()),
            }
        }
        CalibrationOutput::success(curves)
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &CalibrationOutput, options: &CalibrationOptions) -> String {
        if options.quiet {
            return String::new();
        }

        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            self.format_human_readable(output)
        }
    }

    fn format_human_readable(&self, output: &CalibrationOutput) -> String {
        if !output.success {
            return format!(
                "Failed to read calibration: {}\n",
                output.error.as_deref().unwrap_or("unknown error")
            );
        }
        if output.curves.is_empty() {
            return "No calibration history yet.\n".to_string();
        }

        let pct = |v: Option<f64>| v.map_or("-".to_string(), |v| format!("{:.0}%", v * 100.0));
        let mut lines = Vec::new();
        for curve in &output.curves {
            lines.push(format!(
                "{}: {} samples, predicted {}, observed {}, error {} (updated {})",
                curve.category,
                curve.sample_count,
                pct(curve.mean_predicted),
                pct(curve.mean_observed),
                pct(curve.calibration_error),
                curve.updated
            ));
            for (lower, upper, count, observed) in &curve.bins {
                lines.push(format!(
                    "  [{:.1}, {:.1}) n={:<4} observed {:.0}%",
                    lower,
                    upper,
                    count,
                    observed * 100.0
                ));
            }
        }
        lines.join("\n") + "\n"
    }
}
