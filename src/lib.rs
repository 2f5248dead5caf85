//! # srcreel - Source tree recordings
//!
//! Records how a directory tree evolves over time into a single append-only
//! file, and reads any moment of that history back.
//!
//! ## Overview
//!
//! A recording is a sequence of segments, one per snapshot:
//! - **Key segments** hold the complete content of the tree
//! - **Diff segments** hold only the change since the previous segment
//!
//! Every `key_snapshot_spacing`-th segment is a key, so any point can be rebuilt
//! from a short *replay chain*: the nearest key at or before it, followed by
//! the diffs up to it.
//!
//! srcreel lets you:
//! - Record a tree at a fixed interval for a fixed duration
//! - Tag interesting moments while recording
//! - Look up the state at a segment index or at a time offset
//! - Verify a recording's checksums and structure
//! - Restore any recorded state to a directory
//!
//! ## File Layout
//!
//! ```text
//! +----------------------------+
//! | "SRCREL" | start (u64 LE)  |  file header, 14 bytes
//! +----------------------------+
//! | segment 0 (key)            |
//! | segment 1 (diff)           |
//! | ...                        |
//! +----------------------------+
//!
//! segment:
//! | "KEYSEG"/"DIFSEG" | timestamp u32 | size u32 | tag [64] | sha256 [32] | data [size] |
//! ```
//!
//! Segment timestamps are seconds since the recording start stored in the
//! header. See [`format`] for the details.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use srcreel::provider::{reconstruct, DirectoryProvider, ProviderConfig};
//! use srcreel::{RecorderBuilder, SnapshotReader};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Record ./my_project every 30 seconds for 10 minutes
//! let provider = DirectoryProvider::new(Path::new("./my_project"), ProviderConfig::default())?;
//! let mut recorder = RecorderBuilder::new()
//!     .snapshot_interval(Duration::from_secs(30))
//!     .build(provider, "my_project.srcreel")?;
//! recorder.start(Duration::from_secs(600))?;
//! recorder.close()?;
//!
//! // Rebuild the tree as it was five minutes in
//! let mut reader = SnapshotReader::open("my_project.srcreel")?;
//! if let Some(index) = reader.index_at_or_before_timestamp(300)? {
//!     let tree = reconstruct(&reader.replayable_segments_until(index)?)?;
//!     tree.write_to(Path::new("./at_five_minutes"))?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Reading Damaged Recordings
//!
//! A recording cut short by a crash ends in a partial segment. Strict reads
//! report it as [`ReelError::TruncatedSegment`]; a lenient bulk read stops
//! before it and substitutes empty placeholders for segments whose checksum
//! does not match:
//!
//! ```rust,no_run
//! use srcreel::{BulkReadPolicy, SnapshotReader};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut reader = SnapshotReader::open("crashed.srcreel")?;
//! let segments = reader.snapshots(BulkReadPolicy::Lenient)?;
//! let report = reader.verify()?;
//! println!("{} segments readable; {}", segments.len(), report.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return `Result<T, ReelError>`. Corruption and format
//! problems can be told apart with [`ReelError::is_corruption`] and
//! [`ReelError::is_format_error`].
//!
//! ## Module Organization
//!
//! - [`format`]: On-disk layout, segment encoding and checksums
//! - [`codec`]: Little-endian integer encoding
//! - [`writer`]: Append-only segment writer with the key/diff policy
//! - [`reader`]: Random access, replay chains and timestamp lookup
//! - [`recorder`]: The timed recording loop and its control handle
//! - [`time`]: Monotonic time sources with interruptible sleeps
//! - [`provider`]: Content providers and replay-chain reconstruction
//! - [`archive`]: Zip packaging of trees
//! - [`verification`]: Whole-file integrity reports
//! - [`lock`]: Single-writer lock file
//! - [`types`]: Tree states, deltas and recording summaries
//! - [`error`]: Error types and handling

// Public API modules
pub mod archive;
pub mod codec;
pub mod error;
pub mod format;
pub mod lock;
pub mod provider;
pub mod reader;
pub mod recorder;
pub mod time;
pub mod types;
pub mod utils;
pub mod verification;
pub mod writer;

// Re-export main types for convenience
pub use error::{ReelError, Result};
pub use format::{FileHeader, Segment, SegmentHeader, SegmentKind};
pub use provider::{ContentProvider, DirectoryProvider, ProviderConfig};
pub use reader::{BulkReadPolicy, SnapshotReader};
pub use recorder::{Recorder, RecorderBuilder, RecorderConfig, RecorderHandle, RecorderState};
pub use time::{FakeTimeSource, SystemMonotonicTimeSource, TimeSource};
pub use types::*;
pub use verification::VerificationReport;
pub use writer::SnapshotWriter;
