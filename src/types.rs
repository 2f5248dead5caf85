//! Core data types shared across the srcreel library
//!
//! - **Tree content**: [`TreeState`] and [`TreeDelta`], the in-memory form of
//!   what key and diff payloads carry for the directory provider
//! - **Recording results**: [`RecordingSummary`]
//!
//! ## Examples
//!
//! ```rust
//! use srcreel::types::TreeState;
//!
//! let mut before = TreeState::new();
//! before.insert("src/main.rs", b"fn main() {}".to_vec());
//!
//! let mut after = before.clone();
//! after.insert("README.md", b"# demo".to_vec());
//! after.remove("src/main.rs");
//!
//! let delta = before.diff(&after);
//! assert_eq!(delta.changed.len(), 1);
//! assert_eq!(delta.removed, vec!["src/main.rs".to_string()]);
//!
//! before.apply(delta);
//! assert_eq!(before, after);
//! ```

use crate::error::{ReelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path};
use std::time::Duration;
use tracing::debug;

/// Content of a directory tree: relative `/`-separated path to file bytes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeState {
    files: BTreeMap<String, Vec<u8>>,
}

impl TreeState {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a file
    pub fn insert(&mut self, path: impl Into<String>, content: Vec<u8>) {
        self.files.insert(path.into(), content);
    }

    /// Remove a file, returning its content
    pub fn remove(&mut self, path: &str) -> Option<Vec<u8>> {
        self.files.remove(path)
    }

    /// Content of a file
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Number of files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the tree has no files
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files in path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(path, content)| (path.as_str(), content.as_slice()))
    }

    /// Total content size in bytes
    pub fn total_size(&self) -> u64 {
        self.files.values().map(|content| content.len() as u64).sum()
    }

    /// Changes turning `self` into `newer`
    pub fn diff(&self, newer: &TreeState) -> TreeDelta {
        let changed = newer
            .files
            .iter()
            .filter(|(path, content)| self.files.get(*path) != Some(*content))
            .map(|(path, content)| (path.clone(), content.clone()))
            .collect();
        let removed = self
            .files
            .keys()
            .filter(|path| !newer.files.contains_key(*path))
            .cloned()
            .collect();
        TreeDelta { changed, removed }
    }

    /// Apply a delta produced by [`diff`](Self::diff)
    pub fn apply(&mut self, delta: TreeDelta) {
        for path in &delta.removed {
            self.files.remove(path);
        }
        self.files.extend(delta.changed);
    }

    /// Write every file below `dir`, creating directories as needed
    ///
    /// Existing files at the same paths are overwritten; other files are left alone.
    ///
    /// # Errors
    ///
    /// - [`ReelError::Provider`] if a path would escape `dir`
    /// - [`ReelError::Io`] if a file cannot be written
    pub fn write_to(&self, dir: &Path) -> Result<usize> {
        for (path, content) in &self.files {
            let relative = Path::new(path);
            if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
                return Err(ReelError::provider(format!("refusing to restore unsafe path {:?}", path)));
            }
            let target = dir.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, content)?;
        }
        debug!("Restored {} files into {:?}", self.files.len(), dir);
        Ok(self.files.len())
    }
}

impl FromIterator<(String, Vec<u8>)> for TreeState {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

/// Changes between two tree states
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDelta {
    /// Added or modified files with their new content
    pub changed: BTreeMap<String, Vec<u8>>,
    /// Paths of deleted files
    pub removed: Vec<String>,
}

impl TreeDelta {
    /// Whether the delta changes nothing
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Outcome of a finished recording loop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingSummary {
    /// Ticks executed, successful or not
    pub ticks: usize,
    /// Segments appended
    pub segments_written: usize,
    /// Key segments among those appended
    pub key_segments: usize,
    /// Ticks whose segment could not be produced or written
    pub failed_ticks: usize,
    /// Tags attached to written segments
    pub tags_applied: Vec<String>,
    /// Whether the loop ended because of a stop request
    pub stopped_by_request: bool,
    /// Recording time as measured by the time source
    pub elapsed: Duration,
}
