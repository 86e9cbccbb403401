//! Completion record storage.
//!
//! The record is a single "tour already shown" flag. It is created lazily,
//! only ever set to true, and never deleted here.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted completion flag
pub trait CompletionStore: Send + Sync {
    fn is_completed(&self) -> Result<bool>;

    fn mark_completed(&self) -> Result<()>;
}

/// On-disk form of the record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// JSON file store under the state directory
pub struct FileCompletionStore {
    path: PathBuf,
}

impl FileCompletionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full record; a missing file is an empty record
    pub fn load(&self) -> Result<CompletionRecord> {
        if !self.path.exists() {
            return Ok(CompletionRecord::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&contents).context("Failed to parse completion record")
    }
}

impl CompletionStore for FileCompletionStore {
    fn is_completed(&self) -> Result<bool> {
        Ok(self.load()?.completed)
    }

    fn mark_completed(&self) -> Result<()> {
        if self.load().map(|r| r.completed).unwrap_or(false) {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        let record = CompletionRecord {
            completed: true,
            completed_at: Some(Utc::now()),
        };
        let contents = serde_json::to_string_pretty(&record)?;
        fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

/// In-memory store for hosts without durable storage, and for tests
#[derive(Debug, Default)]
pub struct MemoryCompletionStore {
    completed: AtomicBool,
    writes: AtomicU32,
    fail_reads: bool,
    fail_writes: bool,
}

impl MemoryCompletionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed() -> Self {
        let store = Self::default();
        store.completed.store(true, Ordering::SeqCst);
        store
    }

    /// Store whose reads always fail
    pub fn failing_reads() -> Self {
        Self {
            fail_reads: true,
            ..Self::default()
        }
    }

    /// Store whose writes always fail
    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    /// Number of `mark_completed` calls received, failed ones included
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl CompletionStore for MemoryCompletionStore {
    fn is_completed(&self) -> Result<bool> {
        if self.fail_reads {
            bail!("storage unavailable");
        }
        Ok(self.completed.load(Ordering::SeqCst))
    }

    fn mark_completed(&self) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes {
            bail!("storage is read-only");
        }
        self.completed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
