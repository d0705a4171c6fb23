//! Persistent reflection log.

use std::path::{Path, PathBuf};

use crate::error::{Result, VigilError};
use crate::journal::JsonLines;
use crate::reflect::ReflectionRecord;

/// Records read back when looking for a category's recent window.
const SCAN_LIMIT: usize = 5000;

/// Append-only JSONL log of reflection records.
pub struct ReflectionLog {
    journal: JsonLines<ReflectionRecord>,
}

impl ReflectionLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            journal: JsonLines::new(path),
        }
    }

    /// Log at the default location (`<vigil_home>/reflections.jsonl`).
    pub fn open_default() -> Result<Self> {
        crate::config::reflection_log_path()
            .map(Self::new)
            .ok_or_else(|| VigilError::config("cannot determine reflection log path"))
    }

    pub fn path(&self) -> PathBuf {
        self.journal.path().to_path_buf()
    }

    pub fn append(&self, record: &ReflectionRecord) -> Result<()> {
        self.journal.append(record)
    }

    /// The most recent `limit` records, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ReflectionRecord>> {
        self.journal.read_tail(limit)
    }

    /// The most recent `limit` records of one category, oldest first.
    pub fn recent_for_category(
        &self,
        category: &str,
        limit: usize,
    ) -> Result<Vec<ReflectionRecord>> {
        let mut records: Vec<ReflectionRecord> = self
            .journal
            .read_tail(SCAN_LIMIT)?
            .into_iter()
            .filter(|r| r.task_category == category)
            .collect();
        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }

    pub fn count(&self) -> Result<usize> {
        self.journal.count()
    }
}

impl std::fmt::Debug for ReflectionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflectionLog")
            .field("path", &self.journal.path())
            .finish()
    }
}
