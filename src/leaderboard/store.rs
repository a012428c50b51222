//! Leaderboard Storage
//!
//! Whole-list read and atomic replace. A store with no data reads as an
//! empty list, never as an error. An unreadable file is moved aside to
//! `<name>.corrupt` and the list starts over.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::error;

use super::LeaderboardEntry;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("leaderboard I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Entries could not be encoded.
    #[error("leaderboard encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable home of the leaderboard list.
pub trait LeaderboardStore: Send + Sync {
    /// Read the stored list. Missing data is an empty list.
    fn read(&self) -> Result<Vec<LeaderboardEntry>, StoreError>;

    /// Replace the stored list.
    fn write(&self, entries: &[LeaderboardEntry]) -> Result<(), StoreError>;
}

// =============================================================================
// FILE STORE
// =============================================================================

/// Pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling_path(".tmp")
    }

    fn quarantine_path(&self) -> PathBuf {
        self.sibling_path(".corrupt")
    }

    fn sibling_path(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "leaderboard.json".into());
        name.push(suffix);
        self.path.with_file_name(name)
    }
}

impl LeaderboardStore for FileStore {
    fn read(&self) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        if data.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str(&data) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                let aside = self.quarantine_path();
                error!(
                    "Leaderboard file {} is corrupt ({}), moving it to {}",
                    self.path.display(),
                    e,
                    aside.display()
                );
                fs::rename(&self.path, &aside)?;
                Ok(Vec::new())
            }
        }
    }

    fn write(&self, entries: &[LeaderboardEntry]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.temp_path();
        fs::write(&tmp, json)?;
        // Rename over the old file so readers never see a partial list.
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// Process-local store; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<LeaderboardEntry>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `entries`.
    pub fn with_entries(entries: Vec<LeaderboardEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }
}

impl LeaderboardStore for MemoryStore {
    fn read(&self) -> Result<Vec<LeaderboardEntry>, StoreError> {
        Ok(self.entries.lock().clone())
    }

    fn write(&self, entries: &[LeaderboardEntry]) -> Result<(), StoreError> {
        *self.entries.lock() = entries.to_vec();
        Ok(())
    }
}
