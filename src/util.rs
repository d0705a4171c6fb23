//! Utility functions shared across Vigil modules.

use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::{Result, VigilError};

/// Run `f` on a helper thread and wait at most `timeout` for its result.
///
/// Returns `None` on timeout or if `f` panicked. A timed-out closure keeps
/// running in the background; its result is discarded.
pub fn call_with_timeout<T, F>(timeout: Duration, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    let spawned = thread::Builder::new()
        .name("vigil-call".to_string())
        .spawn(move || {
            let _ = tx.send(f());
        });
    if let Err(e) = spawned {
        tracing::warn!("failed to spawn helper thread: {}", e);
        return None;
    }
    rx.recv_timeout(timeout).ok()
}

/// Truncate a string to `max` characters, appending "..." when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Stable 64-bit FNV-1a hash.
///
/// Used where a decision must be reproducible across processes (sampling).
pub fn stable_hash(s: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    s.bytes()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}

/// Map a string to a stable fraction in [0, 1).
pub fn stable_fraction(s: &str) -> f64 {
    (stable_hash(s) % 10_000) as f64 / 10_000.0
}

/// Write `content` to `path` atomically (temp file, fsync, rename).
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| VigilError::storage(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

    fs::write(&temp_path, content).map_err(|e| VigilError::storage(&temp_path, e))?;
    let file = fs::File::open(&temp_path).map_err(|e| VigilError::storage(&temp_path, e))?;
    file.sync_all()
        .map_err(|e| VigilError::storage(&temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| VigilError::storage(path, e))?;
    Ok(())
}

/// Split text into lowercase word tokens (alphanumerics, apostrophes kept).
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Words too common to carry meaning when comparing step contents.
pub const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in", "is",
    "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "will", "with",
    "which", "what", "there", "their", "so", "then", "than", "not", "no", "we", "i", "you",
];

/// Content terms of a text: tokens of three or more characters that are not
/// stopwords.
pub fn content_terms(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Split text into sentences on terminal punctuation.
///
/// A period only ends a sentence when followed by whitespace or the end of
/// the text, so decimals like "2.5" stay intact.
pub fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        let ends = match c {
            '!' | '?' | '\n' | ';' => true,
            '.' => chars.peek().is_none_or(|(_, next)| next.is_whitespace()),
            _ => false,
        };
        if ends {
            out.push(&text[start..idx]);
            start = idx + c.len_utf8();
        }
    }
    out.push(&text[start..]);
    out.into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_call_with_timeout_returns_value() {
        let result = call_with_timeout(Duration::from_secs(1), || 42);
        assert_eq!(result, Some(42));
    }

    #[test]
    fn test_call_with_timeout_expires() {
        let result = call_with_timeout(Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500));
            1
        });
        assert_eq!(result, None);
    }

    #[test]
    fn test_call_with_timeout_panic_is_none() {
        let result: Option<u8> = call_with_timeout(Duration::from_secs(1), || panic!("boom"));
        assert_eq!(result, None);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly 10", 10), "exactly 10");
        assert_eq!(truncate("this is a long sentence", 10), "this is...");
    }

    #[test]
    fn test_stable_hash_is_stable() {
        assert_eq!(stable_hash(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(stable_hash("int-1"), stable_hash("int-1"));
        assert_ne!(stable_hash("int-1"), stable_hash("int-2"));
        let f = stable_fraction("int-1");
        assert!((0.0..1.0).contains(&f));
    }

    #[test]
    fn test_write_atomic() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("curve.json");

        write_atomic(&path, b"{}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
        assert!(!temp.path().join("nested").join(".curve.json.tmp").exists());

        write_atomic(&path, b"[1]").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "[1]");
    }

    #[test]
    fn test_content_terms() {
        let terms = content_terms("The capital of France is Paris.");
        assert_eq!(terms, vec!["capital", "france", "paris"]);
    }

    #[test]
    fn test_sentences() {
        let s = sentences("It rained. Maybe it snowed!  \nWho knows?");
        assert_eq!(s, vec!["It rained", "Maybe it snowed", "Who knows"]);

        let s = sentences("Growth was 2.5% this year. Costs fell");
        assert_eq!(s, vec!["Growth was 2.5% this year", "Costs fell"]);
    }
}
