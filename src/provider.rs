//! Content providers and replay-chain reconstruction
//!
//! The file format treats payloads as opaque bytes. A [`ContentProvider`]
//! decides what those bytes are: when asked for a [`SegmentKind::Key`] it
//! returns the complete current content, and when asked for a
//! [`SegmentKind::Diff`] it returns a delta against the content it produced on
//! its previous call.
//!
//! [`DirectoryProvider`] is the provider for source trees:
//!
//! - **Key payload**: a zip archive of every regular file under the root
//! - **Diff payload**: an lz4-compressed, bincode-encoded [`TreeDelta`]
//!
//! [`reconstruct`] turns a replay chain read back from a recording into the
//! [`TreeState`] it describes.
//!
//! ```rust,no_run
//! use srcreel::provider::{reconstruct, DirectoryProvider, ProviderConfig};
//! use srcreel::SnapshotReader;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = DirectoryProvider::new(
//!     Path::new("./project"),
//!     ProviderConfig {
//!         ignore_patterns: vec!["target/**".to_string(), ".git/**".to_string()],
//!         ..Default::default()
//!     },
//! )?;
//!
//! // ... record with it, then later:
//! let mut reader = SnapshotReader::open("session.srcreel")?;
//! let tree = reconstruct(&reader.replayable_segments_until(12)?)?;
//! tree.write_to(Path::new("./restored"))?;
//! # Ok(())
//! # }
//! ```

use crate::archive::{pack_tree_to_vec, unpack_tree};
use crate::error::{ReelError, Result};
use crate::format::{Segment, SegmentKind};
use crate::types::{TreeDelta, TreeState};
use crate::utils::relative_key;
use globset::{Glob, GlobSet, GlobSetBuilder};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Source of segment payloads
pub trait ContentProvider: Send {
    /// Produce the payload for a segment of the given kind
    ///
    /// - `Key`: complete content, independent of any earlier call
    /// - `Diff`: delta from the content produced by the previous call
    fn produce(&mut self, kind: SegmentKind) -> Result<Vec<u8>>;
}

impl<P: ContentProvider + ?Sized> ContentProvider for Box<P> {
    fn produce(&mut self, kind: SegmentKind) -> Result<Vec<u8>> {
        (**self).produce(kind)
    }
}

/// Configuration for [`DirectoryProvider`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Glob patterns, relative to the root, of files to leave out
    pub ignore_patterns: Vec<String>,
    /// Files larger than this many bytes are left out (0 = no limit)
    pub max_file_size: u64,
}

/// Provider snapshotting a directory tree
#[derive(Debug)]
pub struct DirectoryProvider {
    root: PathBuf,
    ignore: GlobSet,
    max_file_size: u64,
    excluded: Vec<PathBuf>,
    previous: Option<TreeState>,
}

impl DirectoryProvider {
    /// Create a provider for the tree under `root`
    ///
    /// # Errors
    ///
    /// - [`ReelError::Io`] if `root` does not exist
    /// - [`ReelError::InvalidPattern`] if an ignore pattern does not compile
    pub fn new(root: &Path, config: ProviderConfig) -> Result<Self> {
        let root = fs::canonicalize(root)?;

        let mut builder = GlobSetBuilder::new();
        for pattern in &config.ignore_patterns {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self {
            root,
            ignore: builder.build()?,
            max_file_size: config.max_file_size,
            excluded: Vec::new(),
            previous: None,
        })
    }

    /// Never include the file at `path`
    ///
    /// Used to keep a recording (and its lock file) out of its own snapshots
    /// when it lives inside the recorded tree. The path does not need to exist yet.
    pub fn exclude(mut self, path: impl Into<PathBuf>) -> Self {
        self.excluded.push(path.into());
        self
    }

    /// Canonical root of the recorded tree
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the current content of the tree
    pub fn scan(&self) -> Result<TreeState> {
        let excluded: Vec<PathBuf> = self
            .excluded
            .iter()
            .filter_map(|path| fs::canonicalize(path).ok())
            .collect();

        let mut tree = TreeState::new();
        let walker = WalkDir::new(&self.root).follow_links(false).sort_by_file_name();

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if excluded.iter().any(|path| path == entry.path()) {
                trace!("Skipping excluded file {:?}", entry.path());
                continue;
            }

            let key = relative_key(entry.path(), &self.root)?;
            if self.ignore.is_match(&key) {
                trace!("Ignoring {}", key);
                continue;
            }
            if self.max_file_size > 0 && entry.metadata()?.len() > self.max_file_size {
                debug!("Skipping {} (larger than {} bytes)", key, self.max_file_size);
                continue;
            }

            match fs::read(entry.path()) {
                Ok(content) => tree.insert(key, content),
                // Deleted between listing and reading
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }

        trace!("Scanned {} files under {:?}", tree.len(), self.root);
        Ok(tree)
    }
}

impl ContentProvider for DirectoryProvider {
    fn produce(&mut self, kind: SegmentKind) -> Result<Vec<u8>> {
        let current = self.scan()?;
        let payload = match kind {
            SegmentKind::Key => pack_tree_to_vec(&current)?,
            SegmentKind::Diff => {
                let delta = match &self.previous {
                    Some(previous) => previous.diff(&current),
                    None => TreeState::new().diff(&current),
                };
                debug!(
                    "Tree delta: {} changed, {} removed",
                    delta.changed.len(),
                    delta.removed.len()
                );
                encode_delta(&delta)?
            }
        };
        self.previous = Some(current);
        Ok(payload)
    }
}

/// Serialize and compress a delta into a diff payload
pub fn encode_delta(delta: &TreeDelta) -> Result<Vec<u8>> {
    let encoded = bincode::serde::encode_to_vec(delta, bincode::config::standard())?;
    Ok(compress_prepend_size(&encoded))
}

/// Decode a diff payload produced by [`encode_delta`]
pub fn decode_delta(payload: &[u8]) -> Result<TreeDelta> {
    let encoded = decompress_size_prepended(payload)
        .map_err(|e| ReelError::Decompression(e.to_string()))?;
    let (delta, _): (TreeDelta, usize) =
        bincode::serde::decode_from_slice(&encoded, bincode::config::standard())?;
    Ok(delta)
}

/// Rebuild the tree described by a replay chain
///
/// The chain must start with a key segment; each following diff is applied
/// in order. A later key segment replaces the state outright.
///
/// # Errors
///
/// - [`ReelError::MissingKeySegment`] if the chain is empty or starts with a diff
pub fn reconstruct(chain: &[Segment]) -> Result<TreeState> {
    let (first, rest) = chain
        .split_first()
        .ok_or(ReelError::MissingKeySegment(0))?;

    let mut state = match first.kind {
        SegmentKind::Key => unpack_tree(&first.data)?,
        SegmentKind::Diff => return Err(ReelError::MissingKeySegment(0)),
    };

    for segment in rest {
        match segment.kind {
            SegmentKind::Key => state = unpack_tree(&segment.data)?,
            SegmentKind::Diff => state.apply(decode_delta(&segment.data)?),
        }
    }

    debug!("Reconstructed {} files from {} segments", state.len(), chain.len());
    Ok(state)
}
