//! Configuration loading for Vigil.
//!
//! Configuration follows a precedence chain:
//! 1. Environment variables (highest priority)
//! 2. Project config (`.vigil/config.toml`)
//! 3. User config (`~/.vigil/config.toml`)
//! 4. Defaults (lowest priority)
//!
//! All configuration is optional. The monitor runs with sensible defaults
//! when no config exists.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FailOpen, Result, VigilError};
use crate::reflect::ReflectionPolicy;
use crate::safety::Severity;

/// Main configuration struct for Vigil.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Confidence estimation.
    pub confidence: ConfidenceConfig,
    /// Uncertainty detection.
    pub uncertainty: UncertaintyConfig,
    /// Safety monitoring.
    pub safety: SafetyConfig,
    /// Self-correction.
    pub correction: CorrectionConfig,
    /// Escalation to human experts.
    pub escalation: EscalationConfig,
    /// Post-interaction reflection.
    pub reflection: ReflectionConfig,
    /// Calibration store.
    pub calibration: CalibrationConfig,
}

/// Confidence estimation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Confidence below which self-correction is attempted.
    pub threshold: f64,
    /// Factor weights.
    pub weights: FactorWeights,
    /// Samples a category needs before its calibration is trusted.
    pub min_history_samples: u32,
    /// Historical factor used when calibration is missing or unreliable.
    pub neutral_history: f64,
    /// Deadline for the calibration lookup.
    pub calibration_timeout_ms: u64,
}

impl ConfidenceConfig {
    /// Check if a probability-like value is valid (finite, in [0.0, 1.0]).
    pub fn is_valid_unit(value: f64) -> bool {
        value.is_finite() && (0.0..=1.0).contains(&value)
    }

    /// Calibration lookup deadline.
    pub fn calibration_timeout(&self) -> Duration {
        Duration::from_millis(self.calibration_timeout_ms)
    }
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            weights: FactorWeights::default(),
            min_history_samples: 20,
            neutral_history: 0.5,
            calibration_timeout_ms: 250,
        }
    }
}

/// Weights of the four confidence factors.
///
/// Weights are normalized by their sum when applied, so they need not add
/// up to one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FactorWeights {
    pub reported: f64,
    pub coherence: f64,
    pub historical: f64,
    pub uncertainty: f64,
}

impl FactorWeights {
    /// Sum of all weights.
    pub fn total(&self) -> f64 {
        self.reported + self.coherence + self.historical + self.uncertainty
    }

    /// Weights must be finite, non-negative and not all zero.
    pub fn is_valid(&self) -> bool {
        let all = [self.reported, self.coherence, self.historical, self.uncertainty];
        all.iter().all(|w| w.is_finite() && *w >= 0.0) && self.total() > 0.0
    }

    /// Weights scaled to sum to one. Invalid weights fall back to defaults.
    pub fn normalized(&self) -> FactorWeights {
        let weights = if self.is_valid() {
            self.clone()
        } else {
            tracing::warn!("invalid confidence weights {:?}, using defaults", self);
            FactorWeights::default()
        };
        let total = weights.total();
        FactorWeights {
            reported: weights.reported / total,
            coherence: weights.coherence / total,
            historical: weights.historical / total,
            uncertainty: weights.uncertainty / total,
        }
    }
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            reported: 0.3,
            coherence: 0.3,
            historical: 0.2,
            uncertainty: 0.2,
        }
    }
}

/// Uncertainty detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UncertaintyConfig {
    /// Magnitude a signal must exceed to be reported.
    pub signal_threshold: f64,
    /// Per-type threshold overrides keyed by type name.
    pub type_thresholds: HashMap<String, f64>,
    /// Time budget for a single strategy.
    pub strategy_budget_ms: u64,
}

/// Valid uncertainty type names.
pub const VALID_UNCERTAINTY_TYPES: &[&str] = &["semantic", "logical", "factual", "procedural"];

impl UncertaintyConfig {
    /// Threshold for an uncertainty type, falling back to the global one.
    pub fn threshold_for(&self, uncertainty_type: &str) -> f64 {
        self.type_thresholds
            .get(uncertainty_type)
            .copied()
            .filter(|t| ConfidenceConfig::is_valid_unit(*t))
            .unwrap_or(self.signal_threshold)
    }

    /// Per-strategy time budget.
    pub fn strategy_budget(&self) -> Duration {
        Duration::from_millis(self.strategy_budget_ms)
    }
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        Self {
            signal_threshold: 0.3,
            type_thresholds: HashMap::new(),
            strategy_budget_ms: 500,
        }
    }
}

/// Safety monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SafetyConfig {
    /// Minimum issue severity that forces escalation: "low", "medium",
    /// "high" or "critical".
    pub escalation_severity: String,
    /// Deadline for the whole detector ensemble.
    pub detector_timeout_ms: u64,
    /// Domains where a high bias score is raised to critical.
    pub regulated_domains: Vec<String>,
}

/// Valid values for the escalation severity field.
pub const VALID_SEVERITIES: &[&str] = &["low", "medium", "high", "critical"];

impl SafetyConfig {
    /// Check if a severity value is valid.
    pub fn is_valid_severity(value: &str) -> bool {
        VALID_SEVERITIES.contains(&value)
    }

    /// Parsed escalation severity (invalid values fall back to high).
    pub fn escalation_severity(&self) -> Severity {
        Severity::parse(&self.escalation_severity).unwrap_or_else(|| {
            tracing::warn!(
                "invalid escalation severity '{}', using 'high'",
                self.escalation_severity
            );
            Severity::High
        })
    }

    /// Detector ensemble deadline.
    pub fn detector_timeout(&self) -> Duration {
        Duration::from_millis(self.detector_timeout_ms)
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            escalation_severity: "high".to_string(),
            detector_timeout_ms: 1000,
            regulated_domains: [
                "hiring",
                "lending",
                "housing",
                "insurance",
                "healthcare",
                "admissions",
            ]
            .iter()
            .map(|d| d.to_string())
            .collect(),
        }
    }
}

/// Self-correction configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Maximum correction attempts per interaction.
    pub max_attempts: u32,
    /// Deadline for a knowledge lookup.
    pub lookup_timeout_ms: u64,
}

/// Upper bound on correction attempts accepted from config.
pub const MAX_CORRECTION_ATTEMPTS: u32 = 5;

impl CorrectionConfig {
    /// Check if max_attempts is valid (1..=5).
    pub fn is_valid_max_attempts(value: u32) -> bool {
        (1..=MAX_CORRECTION_ATTEMPTS).contains(&value)
    }

    /// Knowledge lookup deadline.
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            lookup_timeout_ms: 2000,
        }
    }
}

/// Escalation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EscalationConfig {
    /// Confidence below which an interaction is escalated.
    pub confidence_floor: f64,
    /// Deadline for expert matching.
    pub matching_timeout_ms: u64,
    /// Domain tags that always escalate.
    pub always_escalate_domains: Vec<String>,
    /// Users whose interactions always escalate.
    pub always_escalate_users: Vec<String>,
    /// Experts known to the static directory.
    pub experts: Vec<ExpertConfig>,
}

impl EscalationConfig {
    /// Expert matching deadline.
    pub fn matching_timeout(&self) -> Duration {
        Duration::from_millis(self.matching_timeout_ms)
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.5,
            matching_timeout_ms: 500,
            always_escalate_domains: Vec::new(),
            always_escalate_users: Vec::new(),
            experts: Vec::new(),
        }
    }
}

/// One human expert in the static roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpertConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Expertise tags (e.g. "safety", "medical", "general").
    #[serde(default)]
    pub expertise: Vec<String>,
    /// Typical response time.
    #[serde(default = "default_response_time")]
    pub response_time_minutes: u32,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_response_time() -> u32 {
    60
}

fn default_available() -> bool {
    true
}

/// Reflection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReflectionConfig {
    /// Scheduling policy: "immediate", "batched" or "sampled".
    pub policy: String,
    /// Jobs per batch for the batched policy.
    pub batch_size: u32,
    /// Fraction of interactions reflected under the sampled policy.
    pub sample_rate: f64,
    /// Recent records per category considered by pattern analysis.
    pub pattern_window: u32,
    /// Occurrences within the window that make an issue recurring.
    pub recurring_threshold: u32,
}

/// Valid values for the reflection policy field.
pub const VALID_POLICIES: &[&str] = &["immediate", "batched", "sampled"];

impl ReflectionConfig {
    /// Check if a policy value is valid.
    pub fn is_valid_policy(value: &str) -> bool {
        VALID_POLICIES.contains(&value)
    }

    /// Parsed scheduling policy (invalid values fall back to immediate).
    pub fn policy(&self) -> ReflectionPolicy {
        match self.policy.as_str() {
            "batched" => ReflectionPolicy::Batched {
                batch_size: self.batch_size.max(1) as usize,
            },
            "sampled" => ReflectionPolicy::Sampled {
                rate: self.sample_rate.clamp(0.0, 1.0),
            },
            "immediate" => ReflectionPolicy::Immediate,
            other => {
                tracing::warn!("invalid reflection policy '{}', using 'immediate'", other);
                ReflectionPolicy::Immediate
            }
        }
    }
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            policy: "immediate".to_string(),
            batch_size: 10,
            sample_rate: 0.2,
            pattern_window: 50,
            recurring_threshold: 3,
        }
    }
}

/// Calibration store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Most recent samples kept per category.
    pub window: u32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self { window: 500 }
    }
}

impl Config {
    /// Load configuration with full precedence chain.
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables
    /// 2. Project config (`.vigil/config.toml` in cwd)
    /// 3. User config (`~/.vigil/config.toml`)
    /// 4. Defaults
    pub fn load() -> Self {
        match env::current_dir() {
            Ok(cwd) => Self::load_from_cwd(&cwd),
            Err(_) => {
                let mut config = Config::default();
                if let Some(user_config) = Self::load_user_config() {
                    config = config.merge(user_config);
                }
                config.apply_env_overrides();
                config
            }
        }
    }

    /// Load configuration with a specific working directory.
    pub fn load_from_cwd(cwd: &Path) -> Self {
        let mut config = Config::default();

        if let Some(user_config) = Self::load_user_config() {
            config = config.merge(user_config);
        }

        if let Some(project_config) = Self::load_project_config(cwd) {
            config = config.merge(project_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Load user config from `~/.vigil/config.toml`.
    fn load_user_config() -> Option<Config> {
        let home = vigil_home()?;
        Self::load_from_file(&home.join("config.toml")).ok()
    }

    /// Load project config from `.vigil/config.toml` under the project root.
    fn load_project_config(cwd: &Path) -> Option<Config> {
        Self::load_from_file(&project_vigil_dir(cwd).join("config.toml")).ok()
    }

    /// Load config from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|e| VigilError::storage(path, e))?;
        toml::from_str(&content).map_err(|e| VigilError::config(e.to_string()))
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        // VIGIL_CONFIDENCE_THRESHOLD
        if let Ok(val) = env::var("VIGIL_CONFIDENCE_THRESHOLD") {
            match val.parse::<f64>() {
                Ok(n) if ConfidenceConfig::is_valid_unit(n) => self.confidence.threshold = n,
                Ok(n) => eprintln!(
                    "Warning: Invalid VIGIL_CONFIDENCE_THRESHOLD value '{}'. \
                    Must be in range [0.0, 1.0]. Using '{}'.",
                    n, self.confidence.threshold
                ),
                Err(_) => eprintln!(
                    "Warning: Invalid VIGIL_CONFIDENCE_THRESHOLD value '{}'. \
                    Expected a decimal number. Using '{}'.",
                    val, self.confidence.threshold
                ),
            }
        }

        // VIGIL_MAX_CORRECTIONS
        if let Ok(val) = env::var("VIGIL_MAX_CORRECTIONS") {
            match val.parse::<u32>() {
                Ok(n) if CorrectionConfig::is_valid_max_attempts(n) => {
                    self.correction.max_attempts = n
                }
                Ok(n) => eprintln!(
                    "Warning: Invalid VIGIL_MAX_CORRECTIONS value '{}'. \
                    Must be between 1 and {}. Using '{}'.",
                    n, MAX_CORRECTION_ATTEMPTS, self.correction.max_attempts
                ),
                Err(_) => eprintln!(
                    "Warning: Invalid VIGIL_MAX_CORRECTIONS value '{}'. \
                    Expected a positive integer. Using '{}'.",
                    val, self.correction.max_attempts
                ),
            }
        }

        // VIGIL_MIN_HISTORY_SAMPLES
        if let Ok(val) = env::var("VIGIL_MIN_HISTORY_SAMPLES") {
            match val.parse::<u32>() {
                Ok(n) => self.confidence.min_history_samples = n,
                Err(_) => eprintln!(
                    "Warning: Invalid VIGIL_MIN_HISTORY_SAMPLES value '{}'. \
                    Expected a non-negative integer. Using '{}'.",
                    val, self.confidence.min_history_samples
                ),
            }
        }

        // VIGIL_ESCALATION_SEVERITY
        if let Ok(val) = env::var("VIGIL_ESCALATION_SEVERITY") {
            if SafetyConfig::is_valid_severity(&val) {
                self.safety.escalation_severity = val;
            } else {
                eprintln!(
                    "Warning: Invalid VIGIL_ESCALATION_SEVERITY value '{}'. \
                    Valid values: {:?}. Using '{}'.",
                    val, VALID_SEVERITIES, self.safety.escalation_severity
                );
            }
        }

        // VIGIL_REFLECTION_POLICY
        if let Ok(val) = env::var("VIGIL_REFLECTION_POLICY") {
            if ReflectionConfig::is_valid_policy(&val) {
                self.reflection.policy = val;
            } else {
                eprintln!(
                    "Warning: Invalid VIGIL_REFLECTION_POLICY value '{}'. \
                    Valid values: {:?}. Using '{}'.",
                    val, VALID_POLICIES, self.reflection.policy
                );
            }
        }

        // VIGIL_CALIBRATION_TIMEOUT_MS
        if let Ok(val) = env::var("VIGIL_CALIBRATION_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => self.confidence.calibration_timeout_ms = n,
                _ => eprintln!(
                    "Warning: Invalid VIGIL_CALIBRATION_TIMEOUT_MS value '{}'. \
                    Expected a positive integer. Using '{}'.",
                    val, self.confidence.calibration_timeout_ms
                ),
            }
        }
    }

    /// Merge another config into this one.
    ///
    /// The `other` config takes precedence. All non-default fields from `other`
    /// are applied to `self`, field by field rather than section by section.
    ///
    /// # Limitation
    ///
    /// A layer cannot set a value back to its default to override a
    /// non-default value from a lower-precedence layer, because "not set" and
    /// "set to the default" are indistinguishable after deserialization.
    fn merge(mut self, other: Config) -> Self {
        let d = Config::default();

        // Confidence
        if other.confidence.threshold != d.confidence.threshold {
            self.confidence.threshold = other.confidence.threshold;
        }
        if other.confidence.weights.reported != d.confidence.weights.reported {
            self.confidence.weights.reported = other.confidence.weights.reported;
        }
        if other.confidence.weights.coherence != d.confidence.weights.coherence {
            self.confidence.weights.coherence = other.confidence.weights.coherence;
        }
        if other.confidence.weights.historical != d.confidence.weights.historical {
            self.confidence.weights.historical = other.confidence.weights.historical;
        }
        if other.confidence.weights.uncertainty != d.confidence.weights.uncertainty {
            self.confidence.weights.uncertainty = other.confidence.weights.uncertainty;
        }
        if other.confidence.min_history_samples != d.confidence.min_history_samples {
            self.confidence.min_history_samples = other.confidence.min_history_samples;
        }
        if other.confidence.neutral_history != d.confidence.neutral_history {
            self.confidence.neutral_history = other.confidence.neutral_history;
        }
        if other.confidence.calibration_timeout_ms != d.confidence.calibration_timeout_ms {
            self.confidence.calibration_timeout_ms = other.confidence.calibration_timeout_ms;
        }

        // Uncertainty: per-type thresholds merge additively
        if other.uncertainty.signal_threshold != d.uncertainty.signal_threshold {
            self.uncertainty.signal_threshold = other.uncertainty.signal_threshold;
        }
        for (k, v) in other.uncertainty.type_thresholds {
            self.uncertainty.type_thresholds.insert(k, v);
        }
        if other.uncertainty.strategy_budget_ms != d.uncertainty.strategy_budget_ms {
            self.uncertainty.strategy_budget_ms = other.uncertainty.strategy_budget_ms;
        }

        // Safety
        if other.safety.escalation_severity != d.safety.escalation_severity {
            self.safety.escalation_severity = other.safety.escalation_severity;
        }
        if other.safety.detector_timeout_ms != d.safety.detector_timeout_ms {
            self.safety.detector_timeout_ms = other.safety.detector_timeout_ms;
        }
        if other.safety.regulated_domains != d.safety.regulated_domains {
            self.safety.regulated_domains = other.safety.regulated_domains;
        }

        // Correction
        if other.correction.max_attempts != d.correction.max_attempts {
            self.correction.max_attempts = other.correction.max_attempts;
        }
        if other.correction.lookup_timeout_ms != d.correction.lookup_timeout_ms {
            self.correction.lookup_timeout_ms = other.correction.lookup_timeout_ms;
        }

        // Escalation: rule lists and roster merge additively
        if other.escalation.confidence_floor != d.escalation.confidence_floor {
            self.escalation.confidence_floor = other.escalation.confidence_floor;
        }
        if other.escalation.matching_timeout_ms != d.escalation.matching_timeout_ms {
            self.escalation.matching_timeout_ms = other.escalation.matching_timeout_ms;
        }
        for domain in other.escalation.always_escalate_domains {
            if !self.escalation.always_escalate_domains.contains(&domain) {
                self.escalation.always_escalate_domains.push(domain);
            }
        }
        for user in other.escalation.always_escalate_users {
            if !self.escalation.always_escalate_users.contains(&user) {
                self.escalation.always_escalate_users.push(user);
            }
        }
        for expert in other.escalation.experts {
            match self.escalation.experts.iter_mut().find(|e| e.id == expert.id) {
                Some(existing) => *existing = expert,
                None => self.escalation.experts.push(expert),
            }
        }

        // Reflection
        if other.reflection.policy != d.reflection.policy {
            self.reflection.policy = other.reflection.policy;
        }
        if other.reflection.batch_size != d.reflection.batch_size {
            self.reflection.batch_size = other.reflection.batch_size;
        }
        if other.reflection.sample_rate != d.reflection.sample_rate {
            self.reflection.sample_rate = other.reflection.sample_rate;
        }
        if other.reflection.pattern_window != d.reflection.pattern_window {
            self.reflection.pattern_window = other.reflection.pattern_window;
        }
        if other.reflection.recurring_threshold != d.reflection.recurring_threshold {
            self.reflection.recurring_threshold = other.reflection.recurring_threshold;
        }

        // Calibration
        if other.calibration.window != d.calibration.window {
            self.calibration.window = other.calibration.window;
        }

        self
    }

    /// Load config with fail-open behavior.
    ///
    /// If loading fails for any reason, returns defaults.
    pub fn load_fail_open() -> Self {
        let result: Result<Self> = Ok(Self::load());
        result.fail_open_default("loading config")
    }

    /// Save configuration to the project config file.
    ///
    /// Writes `.vigil/config.toml` in the given directory, creating `.vigil`
    /// if needed. Uses atomic write (temp file, then rename).
    pub fn save_project(&self, cwd: &Path) -> Result<()> {
        let vigil_dir = cwd.join(".vigil");

        if !vigil_dir.exists() {
            fs::create_dir_all(&vigil_dir).map_err(|e| VigilError::storage(&vigil_dir, e))?;
        }

        let config_path = vigil_dir.join("config.toml");
        let content =
            toml::to_string_pretty(self).map_err(|e| VigilError::config(e.to_string()))?;

        let temp_path = vigil_dir.join(".config.toml.tmp");
        fs::write(&temp_path, &content).map_err(|e| VigilError::storage(&temp_path, e))?;

        let file = fs::File::open(&temp_path).map_err(|e| VigilError::storage(&temp_path, e))?;
        file.sync_all()
            .map_err(|e| VigilError::storage(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &config_path).map_err(|e| VigilError::storage(&config_path, e))?;

        Ok(())
    }

    /// Generate a diff of the scalar settings that differ between two configs.
    ///
    /// Returns (key, old_value, new_value) tuples.
    pub fn diff(&self, other: &Config) -> Vec<(String, String, String)> {
        let mut changes = Vec::new();
        let mut push = |key: &str, old: String, new: String| {
            if old != new {
                changes.push((key.to_string(), old, new));
            }
        };

        push(
            "confidence.threshold",
            format!("{:.2}", self.confidence.threshold),
            format!("{:.2}", other.confidence.threshold),
        );
        push(
            "confidence.min_history_samples",
            self.confidence.min_history_samples.to_string(),
            other.confidence.min_history_samples.to_string(),
        );
        push(
            "safety.escalation_severity",
            self.safety.escalation_severity.clone(),
            other.safety.escalation_severity.clone(),
        );
        push(
            "correction.max_attempts",
            self.correction.max_attempts.to_string(),
            other.correction.max_attempts.to_string(),
        );
        push(
            "escalation.confidence_floor",
            format!("{:.2}", self.escalation.confidence_floor),
            format!("{:.2}", other.escalation.confidence_floor),
        );
        push(
            "reflection.policy",
            self.reflection.policy.clone(),
            other.reflection.policy.clone(),
        );
        push(
            "calibration.window",
            self.calibration.window.to_string(),
            other.calibration.window.to_string(),
        );

        changes
    }
}

/// Get the Vigil home directory.
///
/// Checks `VIGIL_HOME` first, then falls back to `~/.vigil`. An empty
/// `VIGIL_HOME` is ignored.
pub fn vigil_home() -> Option<PathBuf> {
    if let Ok(home) = env::var("VIGIL_HOME") {
        if home.is_empty() {
            tracing::warn!("VIGIL_HOME is empty, using default");
        } else {
            let path = PathBuf::from(&home);
            if path.is_absolute() {
                return Some(path);
            }
            if let Ok(canonical) = path.canonicalize() {
                return Some(canonical);
            }
            tracing::warn!("VIGIL_HOME is relative and doesn't exist, using as-is");
            return Some(path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return Some(home.join(".vigil"));
    }

    let fallback_path = fallback_vigil_home();
    tracing::warn!(
        "HOME not set, using fallback location: {}",
        fallback_path.display()
    );
    Some(fallback_path)
}

/// Fallback home when HOME is unavailable.
#[cfg(unix)]
fn fallback_vigil_home() -> PathBuf {
    use std::os::unix::fs::MetadataExt;
    let uid = std::fs::metadata("/").map(|m| m.uid()).unwrap_or(0);
    PathBuf::from(format!("/tmp/vigil-{}", uid))
}

/// Fallback home when HOME is unavailable.
#[cfg(not(unix))]
fn fallback_vigil_home() -> PathBuf {
    std::env::temp_dir().join("vigil")
}

/// Find the project root: the nearest ancestor holding a `.vigil/`
/// directory, else `cwd` itself.
pub fn find_project_root(cwd: &Path) -> PathBuf {
    cwd.ancestors()
        .find(|ancestor| ancestor.join(".vigil").is_dir())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.to_path_buf())
}

/// Get the project `.vigil/` directory for a working directory.
pub fn project_vigil_dir(cwd: &Path) -> PathBuf {
    find_project_root(cwd).join(".vigil")
}

/// Directory holding per-category calibration curves.
///
/// Returns `<vigil_home>/calibration/`.
pub fn calibration_dir() -> Option<PathBuf> {
    vigil_home().map(|h| h.join("calibration"))
}

/// Append-only reflection log.
///
/// Returns `<vigil_home>/reflections.jsonl`.
pub fn reflection_log_path() -> Option<PathBuf> {
    vigil_home().map(|h| h.join("reflections.jsonl"))
}

/// Monitoring event stream.
///
/// Returns `<vigil_home>/events.jsonl`.
pub fn event_log_path() -> Option<PathBuf> {
    vigil_home().map(|h| h.join("events.jsonl"))
}
