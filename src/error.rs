//! Error types for the srcreel library
//!
//! This module defines all error types that can occur while writing, reading
//! or recording a snapshot file. Errors fall into a handful of categories:
//!
//! - **Format errors**: the file is not a recording, or a structural field
//!   cannot be read (bad header magic, unknown segment marker, truncated tail)
//! - **Corruption errors**: a segment's payload does not match its checksum
//! - **I/O errors**: the underlying storage failed
//! - **Lifecycle errors**: the recording is locked by another writer, or the
//!   recorder has already been closed

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the srcreel library
pub type Result<T> = std::result::Result<T, ReelError>;

/// Main error type for all srcreel operations
#[derive(Debug, Error)]
pub enum ReelError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors during bincode serialization/deserialization
    #[error("Bincode error: {0}")]
    Bincode(String),

    /// The file header is missing or its magic bytes do not match
    #[error("Invalid recording header: {0}")]
    InvalidHeader(String),

    /// A segment starts with a marker that is neither key nor diff
    #[error("Unknown segment type {marker:?} at address {address}")]
    UnknownSegmentType {
        /// Address of the offending segment
        address: u64,
        /// Raw marker bytes found at that address
        marker: Vec<u8>,
    },

    /// A segment extends past the end of the file
    #[error("Truncated segment at address {address}: needs {needed} bytes, {available} available")]
    TruncatedSegment {
        /// Address of the incomplete segment
        address: u64,
        /// Bytes required to hold the whole segment
        needed: u64,
        /// Bytes left in the file from that address
        available: u64,
    },

    /// Payload checksum mismatch
    #[error("Checksum mismatch at address {address} - expected: {expected}, actual: {actual}")]
    ChecksumMismatch {
        /// Address of the corrupt segment
        address: u64,
        /// Checksum stored in the segment header
        expected: String,
        /// Checksum computed from the stored payload
        actual: String,
    },

    /// No key segment precedes a diff segment
    #[error("No key segment found at or before index {0}")]
    MissingKeySegment(usize),

    /// Segment index past the end of the recording
    #[error("Segment {index} not found (recording has {count} segments)")]
    SegmentNotFound {
        /// Requested index
        index: usize,
        /// Number of segments in the file
        count: usize,
    },

    /// No segment is recorded at or before a time offset
    #[error("No segment recorded at or before {0}s")]
    NoSegmentAtTime(u32),

    /// A recording failed verification
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Another writer holds the lock for this recording
    #[error("Recording is locked: {0:?} already exists")]
    RecordingLocked(PathBuf),

    /// The recorder was closed and cannot be used again
    #[error("Recorder is closed")]
    RecorderClosed,

    /// Operation not allowed in the recorder's current state
    #[error("Invalid recorder state: {0}")]
    InvalidState(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Archive (zip) errors
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Decompression errors
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Pattern parsing error
    #[error("Invalid ignore pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error")]
    WalkDir(#[from] walkdir::Error),

    /// Content provider failure
    #[error("Content provider error: {0}")]
    Provider(String),

    /// Path conversion error
    #[error("Path conversion error: {0:?}")]
    PathConversion(std::ffi::OsString),
}

// Implement conversions for bincode 2.0 error types
impl From<bincode::error::DecodeError> for ReelError {
    fn from(err: bincode::error::DecodeError) -> Self {
        ReelError::Bincode(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for ReelError {
    fn from(err: bincode::error::EncodeError) -> Self {
        ReelError::Bincode(err.to_string())
    }
}

impl ReelError {
    /// Create a header error with a custom message
    pub fn invalid_header(msg: impl Into<String>) -> Self {
        ReelError::InvalidHeader(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        ReelError::InvalidConfiguration(msg.into())
    }

    /// Create a provider error with a custom message
    pub fn provider(msg: impl Into<String>) -> Self {
        ReelError::Provider(msg.into())
    }

    /// Check if this error indicates a corrupt payload
    pub fn is_corruption(&self) -> bool {
        matches!(self, ReelError::ChecksumMismatch { .. })
    }

    /// Check if this error indicates an unreadable file structure
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            ReelError::InvalidHeader(_)
                | ReelError::UnknownSegmentType { .. }
                | ReelError::TruncatedSegment { .. }
                | ReelError::MissingKeySegment(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            ReelError::RecordingLocked(path) => {
                format!(
                    "Another recorder is writing to this file ({:?} exists). \
                     Remove the lock file if no recorder is running.",
                    path
                )
            }
            ReelError::InvalidHeader(_) => {
                format!("{}. Is this a srcreel recording?", self)
            }
            ReelError::SegmentNotFound { count, .. } => {
                format!("{}. Valid indices are 0..{}.", self, count)
            }
            _ => self.to_string(),
        }
    }
}
