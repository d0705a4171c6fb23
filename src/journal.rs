//! Append-only JSON Lines logs.
//!
//! Both the reflection log and the monitoring event stream are stored as one
//! JSON record per line. Appends never rewrite earlier lines, so a log
//! survives restarts and concurrent readers only ever see whole records.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, VigilError};

/// An append-only JSONL file of `T` records.
pub struct JsonLines<T> {
    path: PathBuf,
    // Serializes appends from threads sharing this handle.
    write_lock: Mutex<()>,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonLines<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Create a log handle for the given path. The file is created lazily.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
            _record: PhantomData,
        }
    }

    /// Append a record.
    pub fn append(&self, record: &T) -> Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| VigilError::serde(format!("failed to serialize record: {}", e)))?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| VigilError::invalid_state("journal write lock poisoned"))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| VigilError::storage(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| VigilError::storage(&self.path, e))?;

        writeln!(file, "{}", json).map_err(|e| VigilError::storage(&self.path, e))?;

        Ok(())
    }

    /// Read every record. A corrupt line is an error.
    pub fn read_all(&self) -> Result<Vec<T>> {
        let Some(content) = self.read_content()? else {
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: T = serde_json::from_str(line).map_err(|e| {
                VigilError::serde(format!(
                    "failed to parse {} line {}: {}",
                    self.path.display(),
                    line_num + 1,
                    e
                ))
            })?;
            records.push(record);
        }

        Ok(records)
    }

    /// Read the last `limit` parseable records, oldest first.
    ///
    /// Corrupt lines (e.g. a torn write after a crash) are skipped with a
    /// warning.
    pub fn read_tail(&self, limit: usize) -> Result<Vec<T>> {
        let Some(content) = self.read_content()? else {
            return Ok(Vec::new());
        };

        let lines: Vec<&str> = content.lines().collect();
        let mut records: Vec<T> = Vec::new();
        for (line_num, line) in lines.iter().enumerate().rev() {
            if records.len() >= limit {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    "skipping corrupt line {} in {}: {}",
                    line_num + 1,
                    self.path.display(),
                    e
                ),
            }
        }

        records.reverse();
        Ok(records)
    }

    /// Count records (non-empty lines).
    pub fn count(&self) -> Result<usize> {
        Ok(self
            .read_content()?
            .map(|c| c.lines().filter(|l| !l.trim().is_empty()).count())
            .unwrap_or(0))
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_content(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&self.path)
            .map(Some)
            .map_err(|e| VigilError::storage(&self.path, e))
    }
}

impl<T> std::fmt::Debug for JsonLines<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLines").field("path", &self.path).finish()
    }
}
