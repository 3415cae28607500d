//! Persistent count of sent SMS
//!
//! The in-memory value is authoritative. Every change is written through to
//! a small JSON file; storage failures are logged and otherwise ignored so a
//! read-only or full disk never blocks sending. The file is replaced
//! atomically, so a crash leaves either the old or the new count on disk.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CounterRecord {
    #[serde(default)]
    sent_count: u64,
}

#[derive(Debug, Error)]
enum CounterStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid counter file: {0}")]
    Format(#[from] serde_json::Error),
    #[error("could not replace counter file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Durable sent-SMS counter
#[derive(Debug)]
pub struct SentCounter {
    path: PathBuf,
    count: Mutex<u64>,
}

impl SentCounter {
    /// Load the counter from `path`; missing or unreadable files start at 0
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let count = if path.exists() {
            match read_record(&path) {
                Ok(record) => {
                    info!(count = record.sent_count, "Loaded SMS counter from {}", path.display());
                    record.sent_count
                }
                Err(e) => {
                    error!(error = %e, "Error loading SMS counter from {}", path.display());
                    0
                }
            }
        } else {
            info!("SMS counter file {} not found, starting from 0", path.display());
            0
        };

        Self {
            path,
            count: Mutex::new(count),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> u64 {
        *self.count.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add one and persist; returns the new value
    pub fn increment(&self) -> u64 {
        let mut count = self.count.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *count += 1;
        self.save(*count);
        *count
    }

    pub fn reset(&self) -> u64 {
        let mut count = self.count.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *count = 0;
        self.save(0);
        info!("SMS counter reset to 0");
        0
    }

    /// [`Self::increment`] on the blocking pool, keeping the fsync off async workers
    pub async fn increment_in_background(self: &Arc<Self>) -> u64 {
        let counter = Arc::clone(self);
        match tokio::task::spawn_blocking(move || counter.increment()).await {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, "SMS counter update task failed");
                self.get()
            }
        }
    }

    /// [`Self::reset`] on the blocking pool
    pub async fn reset_in_background(self: &Arc<Self>) -> u64 {
        let counter = Arc::clone(self);
        match tokio::task::spawn_blocking(move || counter.reset()).await {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, "SMS counter reset task failed");
                self.get()
            }
        }
    }

    fn save(&self, sent_count: u64) {
        match write_record(&self.path, &CounterRecord { sent_count }) {
            Ok(()) => debug!(count = sent_count, "Saved SMS counter"),
            Err(e) => error!(error = %e, "Error saving SMS counter to {}", self.path.display()),
        }
    }
}

fn read_record(path: &Path) -> Result<CounterRecord, CounterStoreError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Write a sibling temp file, sync it, then rename it over `path`
fn write_record(path: &Path, record: &CounterRecord) -> Result<(), CounterStoreError> {
    let parent = match path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(&serde_json::to_vec(record)?)?;
    file.as_file().sync_all()?;
    file.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_starts_at_zero() {
        let dir = TempDir::new().unwrap();
        let counter = SentCounter::load(dir.path().join("sms_counter.json"));
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_increment_writes_through() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sms_counter.json");
        let counter = SentCounter::load(&path);

        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);

        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, serde_json::json!({ "sent_count": 2 }));
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("data").join("sms_counter.json");
        let counter = SentCounter::load(&path);

        counter.increment();

        assert!(path.exists());
    }

    #[test]
    fn test_save_replaces_file_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sms_counter.json");
        std::fs::write(&path, r#"{"sent_count": 7}"#).unwrap();
        let counter = SentCounter::load(&path);

        assert_eq!(counter.increment(), 8);

        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, serde_json::json!({ "sent_count": 8 }));
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "temp file must be renamed into place");
    }

    #[test]
    fn test_failed_write_keeps_previous_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sms_counter.json");
        // a directory in place of the counter file makes the final rename fail
        std::fs::create_dir(&path).unwrap();
        let counter = SentCounter::load(&path);

        assert_eq!(counter.increment(), 1);
        assert!(path.is_dir());
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "failed temp file must be cleaned up");
    }

    #[tokio::test]
    async fn test_background_updates_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sms_counter.json");
        let counter = Arc::new(SentCounter::load(&path));

        assert_eq!(counter.increment_in_background().await, 1);
        assert_eq!(counter.increment_in_background().await, 2);
        assert_eq!(SentCounter::load(&path).get(), 2);

        assert_eq!(counter.reset_in_background().await, 0);
        assert_eq!(SentCounter::load(&path).get(), 0);
    }

    #[test]
    fn test_corrupt_file_starts_at_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sms_counter.json");
        std::fs::write(&path, "{ not json").unwrap();

        let counter = SentCounter::load(&path);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_missing_field_defaults_to_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sms_counter.json");
        std::fs::write(&path, "{}").unwrap();

        assert_eq!(SentCounter::load(&path).get(), 0);
    }

    #[test]
    fn test_unwritable_path_keeps_memory_value() {
        let dir = TempDir::new().unwrap();
        // A regular file where the parent directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let counter = SentCounter::load(blocker.join("sms_counter.json"));

        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        assert_eq!(counter.get(), 2);
    }
}
