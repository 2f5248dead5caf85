//! Recording verification and integrity checking
//!
//! Verification walks every segment of a recording and checks:
//!
//! - each segment is structurally readable (known marker, fits in the file)
//! - each payload matches its stored checksum
//! - the recording starts with a key segment, so every diff has an anchor
//! - timestamps never run backward
//!
//! Unlike [`SnapshotReader::snapshots`](crate::SnapshotReader::snapshots),
//! verification never stops at the first problem; it reports all of them.
//!
//! ```rust,no_run
//! use srcreel::SnapshotReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut reader = SnapshotReader::open("session.srcreel")?;
//! let report = reader.verify()?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::reader::SnapshotReader;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

/// Result of verifying a recording
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Segments found (excluding a truncated tail)
    pub total_segments: usize,
    /// Segments whose payload matches the checksum
    pub valid_segments: usize,
    /// Key segments among the valid ones
    pub key_segments: usize,
    /// Addresses of segments with a checksum mismatch
    pub corrupt_segments: Vec<u64>,
    /// Addresses of segments that could not be decoded at all
    pub unreadable_segments: Vec<u64>,
    /// Address of an incomplete final segment, if any
    pub truncated_tail: Option<u64>,
    /// Whether the first segment is a key segment (true for empty recordings)
    pub starts_with_key: bool,
    /// Addresses of segments whose timestamp is earlier than their predecessor's
    pub ordering_violations: Vec<u64>,
    /// Time taken for verification in milliseconds
    pub verification_time_ms: u64,
}

impl VerificationReport {
    /// Check if the recording is fully intact
    pub fn is_valid(&self) -> bool {
        self.valid_segments == self.total_segments
            && self.truncated_tail.is_none()
            && self.starts_with_key
            && self.ordering_violations.is_empty()
    }

    /// Get a summary of the verification
    pub fn summary(&self) -> String {
        if self.is_valid() {
            format!(
                "Recording is valid: {} segments ({} key) verified in {}ms",
                self.total_segments, self.key_segments, self.verification_time_ms
            )
        } else {
            let mut issues = Vec::new();
            if !self.corrupt_segments.is_empty() {
                issues.push(format!("{} corrupt", self.corrupt_segments.len()));
            }
            if !self.unreadable_segments.is_empty() {
                issues.push(format!("{} unreadable", self.unreadable_segments.len()));
            }
            if let Some(address) = self.truncated_tail {
                issues.push(format!("truncated at {}", address));
            }
            if !self.starts_with_key {
                issues.push("no leading key segment".to_string());
            }
            if !self.ordering_violations.is_empty() {
                issues.push(format!("{} out of order", self.ordering_violations.len()));
            }
            format!(
                "Recording has issues: {}/{} segments valid ({}) in {}ms",
                self.valid_segments,
                self.total_segments,
                issues.join(", "),
                self.verification_time_ms
            )
        }
    }
}

/// Verify every segment of the recording behind `reader`
///
/// The reader's cursor is left at the first segment.
pub(crate) fn verify_recording(reader: &mut SnapshotReader) -> Result<VerificationReport> {
    let start = Instant::now();
    let mut report = VerificationReport {
        starts_with_key: true,
        ..Default::default()
    };
    let mut last_timestamp = None;

    reader.reset()?;
    while reader.has_next()? {
        let address = match reader.next_address() {
            Ok(address) => address,
            Err(e) if e.is_format_error() => {
                warn!("Recording ends with an incomplete segment: {}", e);
                report.truncated_tail = Some(reader.position()?);
                break;
            }
            Err(e) => return Err(e),
        };

        let index = report.total_segments;
        report.total_segments += 1;

        match reader.read_segment_by_address(address) {
            Ok(segment) => {
                report.valid_segments += 1;
                if segment.kind.is_key() {
                    report.key_segments += 1;
                }
                if index == 0 && !segment.kind.is_key() {
                    report.starts_with_key = false;
                }
                if last_timestamp.is_some_and(|last| segment.timestamp < last) {
                    report.ordering_violations.push(address);
                }
                last_timestamp = Some(segment.timestamp);
            }
            Err(e) if e.is_corruption() => {
                debug!("Segment {} at {} is corrupt: {}", index, address, e);
                report.corrupt_segments.push(address);
                if index == 0 {
                    report.starts_with_key = reader.read_segment_header(address)?.kind.is_key();
                }
            }
            Err(e) if e.is_format_error() => {
                debug!("Segment {} at {} is unreadable: {}", index, address, e);
                report.unreadable_segments.push(address);
                if index == 0 {
                    report.starts_with_key = false;
                }
            }
            Err(e) => return Err(e),
        }
    }
    reader.reset()?;

    report.verification_time_ms = start.elapsed().as_millis() as u64;
    Ok(report)
}
