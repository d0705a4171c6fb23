//! Uncertainty detection.
//!
//! An ensemble of independent strategies inspects the reasoning trace and
//! candidate response. Each strategy produces at most one signal of its
//! uncertainty type; signals at or below the per-type threshold are dropped.
//! A failing strategy never fails the assessment, and one that outlives the
//! shared budget is counted as failed without being waited on.

pub mod factual;
pub mod logical;
pub mod procedural;
pub mod semantic;

pub use factual::FactualStrategy;
pub use logical::LogicalStrategy;
pub use procedural::ProceduralStrategy;
pub use semantic::SemanticStrategy;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::UncertaintyConfig;
use crate::core::{CandidateResponse, ReasoningTrace};
use crate::error::{Result, VigilError};

/// Dimension of uncertainty a signal describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyType {
    Semantic,
    Logical,
    Factual,
    Procedural,
}

impl UncertaintyType {
    /// Stable name, also the key for per-type thresholds.
    pub fn as_str(&self) -> &'static str {
        match self {
            UncertaintyType::Semantic => "semantic",
            UncertaintyType::Logical => "logical",
            UncertaintyType::Factual => "factual",
            UncertaintyType::Procedural => "procedural",
        }
    }
}

impl std::fmt::Display for UncertaintyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, evidenced indication that part of a response may be unreliable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UncertaintySignal {
    /// Strategy that produced the signal.
    pub detector: String,
    pub uncertainty_type: UncertaintyType,
    /// Strength in [0, 1].
    pub magnitude: f64,
    pub evidence: Vec<String>,
    /// Suggested way to reduce the uncertainty.
    pub mitigation: String,
}

/// Raw finding of one strategy, before thresholding.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub magnitude: f64,
    pub evidence: Vec<String>,
    pub mitigation: String,
}

impl Detection {
    /// Create a finding; magnitude is clamped to [0, 1].
    pub fn new(magnitude: f64, evidence: Vec<String>, mitigation: impl Into<String>) -> Self {
        Self {
            magnitude: if magnitude.is_nan() {
                0.0
            } else {
                magnitude.clamp(0.0, 1.0)
            },
            evidence,
            mitigation: mitigation.into(),
        }
    }
}

/// Combine independent probabilities: `1 - prod(1 - p)`.
pub fn noisy_or(values: impl IntoIterator<Item = f64>) -> f64 {
    1.0 - values
        .into_iter()
        .map(|v| 1.0 - v.clamp(0.0, 1.0))
        .product::<f64>()
}

/// One uncertainty detection strategy.
pub trait UncertaintyStrategy: Send + Sync {
    /// Unique strategy name.
    fn name(&self) -> &'static str;

    /// Type of uncertainty this strategy reports.
    fn uncertainty_type(&self) -> UncertaintyType;

    /// Whether the strategy is relevant for this trace.
    fn applies_to(&self, _trace: &ReasoningTrace) -> bool {
        true
    }

    /// Inspect the inputs. `Ok(None)` means nothing found.
    fn detect(
        &self,
        trace: &ReasoningTrace,
        response: &CandidateResponse,
    ) -> Result<Option<Detection>>;
}

/// Output of one detection pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DetectionReport {
    /// Signals above threshold, in registry order.
    pub signals: Vec<UncertaintySignal>,
    /// Strategies that failed, panicked or overran their budget.
    pub failed: Vec<String>,
    /// Strategies that were run (applicable ones only).
    #[serde(default)]
    pub attempted: usize,
}

impl DetectionReport {
    /// Noisy-or of all signal magnitudes.
    pub fn aggregate_magnitude(&self) -> f64 {
        noisy_or(self.signals.iter().map(|s| s.magnitude))
    }

    /// Strongest signal of a type (0.0 if none).
    pub fn magnitude_of(&self, uncertainty_type: UncertaintyType) -> f64 {
        self.signals
            .iter()
            .filter(|s| s.uncertainty_type == uncertainty_type)
            .map(|s| s.magnitude)
            .fold(0.0, f64::max)
    }

    /// Signals of a type.
    pub fn of_type(&self, uncertainty_type: UncertaintyType) -> Vec<&UncertaintySignal> {
        self.signals
            .iter()
            .filter(|s| s.uncertainty_type == uncertainty_type)
            .collect()
    }

    /// Whether any signal was reported.
    pub fn has_signals(&self) -> bool {
        !self.signals.is_empty()
    }

    /// Whether every strategy that ran failed.
    pub fn is_blind(&self) -> bool {
        self.attempted > 0 && self.failed.len() == self.attempted
    }
}

/// Registry of uncertainty strategies.
pub struct UncertaintyDetector {
    strategies: Vec<Arc<dyn UncertaintyStrategy>>,
    config: UncertaintyConfig,
}

impl UncertaintyDetector {
    /// Create a detector with no strategies.
    pub fn new(config: UncertaintyConfig) -> Self {
        Self {
            strategies: Vec::new(),
            config,
        }
    }

    /// Create a detector with the four built-in strategies.
    pub fn with_default_strategies(config: UncertaintyConfig) -> Self {
        let mut detector = Self::new(config);
        detector.register(Arc::new(SemanticStrategy::new()));
        detector.register(Arc::new(LogicalStrategy::new()));
        detector.register(Arc::new(FactualStrategy::new()));
        detector.register(Arc::new(ProceduralStrategy::new()));
        detector
    }

    /// Add a strategy. Registering a name twice replaces the earlier one.
    pub fn register(&mut self, strategy: Arc<dyn UncertaintyStrategy>) {
        match self
            .strategies
            .iter()
            .position(|s| s.name() == strategy.name())
        {
            Some(idx) => self.strategies[idx] = strategy,
            None => self.strategies.push(strategy),
        }
    }

    /// Names of the registered strategies, in order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run every applicable strategy concurrently.
    pub fn detect(&self, trace: &ReasoningTrace, response: &CandidateResponse) -> DetectionReport {
        self.detect_shared(&Arc::new(trace.clone()), &Arc::new(response.clone()))
    }

    /// Run every applicable strategy on its own thread against one shared
    /// deadline. A strategy still running at the deadline is recorded as
    /// failed and left to finish in the background.
    pub fn detect_shared(
        &self,
        trace: &Arc<ReasoningTrace>,
        response: &Arc<CandidateResponse>,
    ) -> DetectionReport {
        let budget = self.config.strategy_budget();
        let deadline = Instant::now() + budget;
        let applicable: Vec<&Arc<dyn UncertaintyStrategy>> = self
            .strategies
            .iter()
            .filter(|s| s.applies_to(trace))
            .collect();

        let (tx, rx) = mpsc::channel::<(usize, Result<Option<Detection>>)>();
        let mut results: Vec<Option<Result<Option<Detection>>>> =
            (0..applicable.len()).map(|_| None).collect();
        let mut waiting = 0usize;

        for (index, strategy) in applicable.iter().enumerate() {
            let strategy = Arc::clone(strategy);
            let trace = Arc::clone(trace);
            let response = Arc::clone(response);
            let tx = tx.clone();
            let name = strategy.name();
            let spawned = thread::Builder::new()
                .name(format!("vigil-detect-{}", name))
                .spawn(move || {
                    let result = catch_unwind(AssertUnwindSafe(|| strategy.detect(&trace, &response)))
                        .unwrap_or_else(|_| Err(VigilError::detector(name, "panicked")));
                    let _ = tx.send((index, result));
                });
            match spawned {
                Ok(_) => waiting += 1,
                Err(e) => {
                    results[index] = Some(Err(VigilError::detector(
                        name,
                        format!("failed to spawn: {}", e),
                    )))
                }
            }
        }
        drop(tx);

        while waiting > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((index, result)) => {
                    results[index] = Some(result);
                    waiting -= 1;
                }
                Err(_) => break,
            }
        }

        let outcomes: Vec<(&dyn UncertaintyStrategy, Result<Option<Detection>>)> = applicable
            .iter()
            .zip(results)
            .map(|(strategy, result)| {
                let result = result.unwrap_or_else(|| {
                    Err(VigilError::detector(
                        strategy.name(),
                        format!("exceeded {}ms budget", budget.as_millis()),
                    ))
                });
                (&***strategy, result)
            })
            .collect();

        let mut report = DetectionReport {
            attempted: outcomes.len(),
            ..Default::default()
        };
        for (strategy, result) in outcomes {
            match result {
                Ok(Some(detection)) => {
                    let threshold = self.config.threshold_for(strategy.uncertainty_type().as_str());
                    if detection.magnitude > threshold {
                        report.signals.push(UncertaintySignal {
                            detector: strategy.name().to_string(),
                            uncertainty_type: strategy.uncertainty_type(),
                            magnitude: detection.magnitude,
                            evidence: detection.evidence,
                            mitigation: detection.mitigation,
                        });
                    } else {
                        tracing::debug!(
                            "{} signal {:.3} at or below threshold {:.2}",
                            strategy.name(),
                            detection.magnitude,
                            threshold
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("{} (fail-open: no signal)", e);
                    report.failed.push(strategy.name().to_string());
                }
            }
        }

        report
    }
}

impl std::fmt::Debug for UncertaintyDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UncertaintyDetector")
            .field("strategies", &self.strategy_names())
            .field("config", &self.config)
            .finish()
    }
}
