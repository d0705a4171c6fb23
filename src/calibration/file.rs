//! File-based calibration storage for Vigil.
//!
//! Each category is stored as one JSON file in `~/.vigil/calibration/`,
//! named by a readable prefix plus a hash of the exact category string.
//! The file also records its category, which is checked on load. Writes go
//! through temp file + rename, so a crash never leaves a torn curve behind.

use std::fs;
use std::path::{Path, PathBuf};

use dashmap::DashMap;

use crate::calibration::curve::{CalibrationCurve, CalibrationSample};
use crate::calibration::CalibrationStore;
use crate::config::calibration_dir;
use crate::error::{Result, VigilError};
use crate::util::{stable_hash, write_atomic};

/// File-based calibration store with an in-process cache.
#[derive(Debug)]
pub struct FileCalibrationStore {
    dir: PathBuf,
    window: usize,
    cache: DashMap<String, CalibrationCurve>,
}

impl FileCalibrationStore {
    /// Open the store in the default directory (`<vigil_home>/calibration/`).
    pub fn new(window: usize) -> Result<Self> {
        let dir = calibration_dir().ok_or_else(|| {
            VigilError::config("Could not determine calibration directory (no home directory)")
        })?;
        Self::with_dir(dir, window)
    }

    /// Open the store in a custom directory.
    pub fn with_dir(dir: impl Into<PathBuf>, window: usize) -> Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| VigilError::storage(&dir, e))?;
        }
        Ok(Self {
            dir,
            window,
            cache: DashMap::new(),
        })
    }

    /// Directory holding the curve files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn curve_path(&self, category: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(category)))
    }

    fn load(&self, category: &str) -> Result<Option<CalibrationCurve>> {
        let path = self.curve_path(category);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| VigilError::storage(&path, e))?;
        let curve: CalibrationCurve = serde_json::from_str(&content)?;
        if curve.category != category {
            return Err(VigilError::calibration_unavailable(format!(
                "{} holds the curve for '{}', not '{}'",
                path.display(),
                curve.category,
                category
            )));
        }
        Ok(Some(curve))
    }

    fn persist(&self, curve: &CalibrationCurve) -> Result<()> {
        let json = serde_json::to_string_pretty(curve)?;
        write_atomic(&self.curve_path(&curve.category), json.as_bytes())
    }
}

impl CalibrationStore for FileCalibrationStore {
    fn snapshot(&self, category: &str) -> Result<Option<CalibrationCurve>> {
        if let Some(curve) = self.cache.get(category) {
            return Ok(Some(curve.value().clone()));
        }
        match self.load(category)? {
            Some(curve) => {
                let curve = self
                    .cache
                    .entry(category.to_string())
                    .or_insert(curve)
                    .value()
                    .clone();
                Ok(Some(curve))
            }
            None => Ok(None),
        }
    }

    fn record(&self, category: &str, samples: &[CalibrationSample]) -> Result<CalibrationCurve> {
        // Holding the entry guard across load, recompute and persist makes
        // this the only writer for the category.
        let mut curve = self
            .cache
            .entry(category.to_string())
            .or_try_insert_with(|| {
                self.load(category)
                    .map(|c| c.unwrap_or_else(|| CalibrationCurve::new(category)))
            })?;

        let mut updated = curve.clone();
        updated.record(samples, self.window);
        self.persist(&updated)?;
        *curve = updated.clone();

        Ok(updated)
    }

    fn categories(&self) -> Result<Vec<String>> {
        let mut categories: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();

        let entries = fs::read_dir(&self.dir).map_err(|e| VigilError::storage(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| VigilError::storage(&self.dir, e))?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("skipping unreadable curve {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_str::<CalibrationCurve>(&content) {
                Ok(curve) => categories.push(curve.category),
                Err(e) => tracing::warn!("skipping corrupt curve {}: {}", path.display(), e),
            }
        }

        categories.sort();
        categories.dedup();
        Ok(categories)
    }
}

/// Longest readable prefix kept in a file stem.
const STEM_PREFIX_LEN: usize = 48;

/// File stem for a category: a readable prefix (lowercase alphanumerics,
/// `-` and `_`) plus a hash of the exact category, so categories that
/// differ only in case or punctuation never share a file.
fn file_stem(category: &str) -> String {
    let prefix: String = category
        .chars()
        .take(STEM_PREFIX_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}-{:016x}", prefix, stable_hash(category))
}
