//! Atomic JSON file persistence.
//!
//! Every persisted index (whale list, account index, paper history) is a
//! small JSON document rewritten whole. Writes go through a sibling tmp
//! file followed by a rename so a crash never leaves a torn file.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

/// File-backed JSON document store with atomic rewrites.
///
/// `None` path means in-memory only: loads yield the default and saves are
/// no-ops. This keeps short-lived caches and tests off the disk.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: Option<PathBuf>,
}

impl JsonStore {
    /// A store persisting to `path`. Parent directories are created on save.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// A store that never touches the filesystem.
    #[must_use]
    pub fn in_memory() -> Self {
        Self { path: None }
    }

    /// Returns the backing path, if file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Loads the document, returning `T::default()` when the store is
    /// in-memory or the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load<T: DeserializeOwned + Default>(&self) -> Result<T> {
        let Some(path) = &self.path else {
            return Ok(T::default());
        };
        if !path.exists() {
            return Ok(T::default());
        }
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", path.display()))
    }

    /// Loads the document, failing when the store is in-memory or the
    /// file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error when there is nothing to load or parsing fails.
    pub fn load_required<T: DeserializeOwned>(&self) -> Result<T> {
        let Some(path) = &self.path else {
            anyhow::bail!("in-memory store has no document");
        };
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", path.display()))
    }

    /// Persists the document atomically (tmp file + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the write or
    /// rename fails.
    pub fn save<T: Serialize>(&self, value: &T) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(value)?;
        std::fs::write(&tmp, bytes)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("renaming {} -> {}", tmp.display(), path.display()))?;
        Ok(())
    }
}
