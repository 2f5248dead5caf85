//! On-disk layout of a recording file
//!
//! A recording is a fixed-size header followed by segments stored back to back.
//! Segments are addressed by their absolute byte offset in the file.
//!
//! ```text
//! Header:  [magic "SRCREL": 6][created: 8 LE]
//! Segment: [marker "KEYSEG"|"DIFSEG": 6][timestamp: 4 LE][size: 4 LE]
//!          [tag: 64, NUL padded][sha256(data): 32][data: size]
//! ```
//!
//! The segment marker makes each segment self-describing, so a reader can tell a
//! key segment from a diff segment without decoding the payload. The checksum
//! covers `data` only.

use crate::codec::{bytes_to_int, bytes_to_long, encode_u32, encode_u64};
use crate::error::{ReelError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Magic bytes at the start of every recording
pub const HEADER_MAGIC: [u8; 6] = *b"SRCREL";
/// Size of the header creation timestamp
pub const HEADER_TIMESTAMP_SIZE: usize = 8;
/// Total header size; the first segment starts here
pub const HEADER_SIZE: usize = HEADER_MAGIC.len() + HEADER_TIMESTAMP_SIZE;

/// Marker opening a key segment
pub const KEY_MARKER: [u8; 6] = *b"KEYSEG";
/// Marker opening a diff segment
pub const DIFF_MARKER: [u8; 6] = *b"DIFSEG";
/// Size of a segment marker
pub const MARKER_SIZE: usize = 6;
/// Size of the segment timestamp field
pub const TIMESTAMP_SIZE: usize = 4;
/// Size of the payload length field
pub const SIZE_FIELD_SIZE: usize = 4;
/// Size of the tag field
pub const TAG_SIZE: usize = 64;
/// Size of the checksum field (SHA-256)
pub const CHECKSUM_SIZE: usize = 32;
/// Offset of the payload length field from the segment address
pub const SIZE_OFFSET: usize = MARKER_SIZE + TIMESTAMP_SIZE;
/// Fixed bytes preceding the payload of every segment
pub const SEGMENT_HEADER_SIZE: usize =
    MARKER_SIZE + TIMESTAMP_SIZE + SIZE_FIELD_SIZE + TAG_SIZE + CHECKSUM_SIZE;

/// Recording file header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    /// Unix timestamp (seconds) at which the recording started.
    /// Segment timestamps count seconds from this instant.
    pub timestamp: u64,
}

impl FileHeader {
    /// Create a header for a recording started at `timestamp`
    pub fn new(timestamp: u64) -> Self {
        Self { timestamp }
    }

    /// Encode the header into its fixed-size form
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..HEADER_MAGIC.len()].copy_from_slice(&HEADER_MAGIC);
        buf[HEADER_MAGIC.len()..].copy_from_slice(&encode_u64(self.timestamp));
        buf
    }

    /// Decode and validate a header
    ///
    /// # Errors
    ///
    /// - [`ReelError::InvalidHeader`] if the magic bytes do not match
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let (magic, rest) = buf.split_at(HEADER_MAGIC.len());
        if magic != HEADER_MAGIC {
            return Err(ReelError::invalid_header(format!(
                "bad magic bytes {:02x?}",
                magic
            )));
        }
        let mut timestamp = [0u8; HEADER_TIMESTAMP_SIZE];
        timestamp.copy_from_slice(rest);
        Ok(Self {
            timestamp: bytes_to_long(timestamp),
        })
    }

    /// Recording start as a calendar time, if representable
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.timestamp)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// Kind of a recorded segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentKind {
    /// Complete, self-sufficient content
    Key,
    /// Delta against the state produced by the preceding segment
    Diff,
}

impl SegmentKind {
    /// Marker bytes identifying this kind on disk
    pub fn marker(self) -> [u8; MARKER_SIZE] {
        match self {
            SegmentKind::Key => KEY_MARKER,
            SegmentKind::Diff => DIFF_MARKER,
        }
    }

    /// Parse marker bytes
    pub fn from_marker(marker: &[u8]) -> Option<Self> {
        if marker == KEY_MARKER {
            Some(SegmentKind::Key)
        } else if marker == DIFF_MARKER {
            Some(SegmentKind::Diff)
        } else {
            None
        }
    }

    /// Whether this is a key segment
    pub fn is_key(self) -> bool {
        matches!(self, SegmentKind::Key)
    }
}

impl std::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentKind::Key => write!(f, "key"),
            SegmentKind::Diff => write!(f, "diff"),
        }
    }
}

/// Fixed-size part of a segment, decoded without touching the payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHeader {
    /// Absolute byte offset of the segment
    pub address: u64,
    /// Segment kind
    pub kind: SegmentKind,
    /// Seconds since the recording start
    pub timestamp: u32,
    /// Payload length in bytes
    pub size: u32,
    /// Operator-supplied label, empty when untagged
    pub tag: String,
    /// SHA-256 of the payload
    pub checksum: [u8; CHECKSUM_SIZE],
}

impl SegmentHeader {
    /// Decode the fixed header of the segment at `address`
    ///
    /// # Errors
    ///
    /// - [`ReelError::UnknownSegmentType`] if the marker is not recognized
    pub fn decode(address: u64, buf: &[u8; SEGMENT_HEADER_SIZE]) -> Result<Self> {
        let marker = &buf[..MARKER_SIZE];
        let kind = SegmentKind::from_marker(marker).ok_or_else(|| ReelError::UnknownSegmentType {
            address,
            marker: marker.to_vec(),
        })?;

        let mut pos = MARKER_SIZE;
        let timestamp = bytes_to_int(read_array(buf, pos));
        pos += TIMESTAMP_SIZE;
        let size = bytes_to_int(read_array(buf, pos));
        pos += SIZE_FIELD_SIZE;
        let tag = decode_tag(&buf[pos..pos + TAG_SIZE]);
        pos += TAG_SIZE;
        let checksum = read_array(buf, pos);

        Ok(Self {
            address,
            kind,
            timestamp,
            size,
            tag,
            checksum,
        })
    }

    /// Total bytes occupied by the segment on disk
    pub fn encoded_len(&self) -> u64 {
        SEGMENT_HEADER_SIZE as u64 + self.size as u64
    }
}

/// A single recorded observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Absolute byte offset of the segment in its file
    pub address: u64,
    /// Key or diff
    pub kind: SegmentKind,
    /// Seconds since the recording start
    pub timestamp: u32,
    /// Operator-supplied label, empty when untagged
    pub tag: String,
    /// SHA-256 of `data` as stored on disk
    pub checksum: [u8; CHECKSUM_SIZE],
    /// Payload, opaque to the file format
    pub data: Vec<u8>,
}

impl Segment {
    /// Build a segment for writing; the checksum is computed from `data`.
    ///
    /// The address is assigned when the segment is appended.
    pub fn new(kind: SegmentKind, timestamp: u32, tag: impl Into<String>, data: Vec<u8>) -> Self {
        let checksum = compute_checksum(&data);
        Self {
            address: 0,
            kind,
            timestamp,
            tag: tag.into(),
            checksum,
            data,
        }
    }

    /// Empty key segment standing in for an unreadable one at `address`
    pub fn placeholder(address: u64) -> Self {
        let mut segment = Segment::new(SegmentKind::Key, 0, String::new(), Vec::new());
        segment.address = address;
        segment
    }

    /// Assemble a segment from a decoded header and its payload
    pub fn from_parts(header: SegmentHeader, data: Vec<u8>) -> Self {
        Self {
            address: header.address,
            kind: header.kind,
            timestamp: header.timestamp,
            tag: header.tag,
            checksum: header.checksum,
            data,
        }
    }

    /// Payload length
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the stored checksum matches the payload
    pub fn is_data_valid(&self) -> bool {
        compute_checksum(&self.data) == self.checksum
    }

    /// Fail with [`ReelError::ChecksumMismatch`] unless the payload is intact
    pub fn verify(&self) -> Result<()> {
        let actual = compute_checksum(&self.data);
        if actual != self.checksum {
            return Err(ReelError::ChecksumMismatch {
                address: self.address,
                expected: hex::encode(self.checksum),
                actual: hex::encode(actual),
            });
        }
        Ok(())
    }

    /// Checksum as a hex string
    pub fn checksum_hex(&self) -> String {
        hex::encode(self.checksum)
    }

    /// Total bytes this segment occupies on disk
    pub fn encoded_len(&self) -> usize {
        SEGMENT_HEADER_SIZE + self.data.len()
    }

    /// Encode the segment into a single buffer ready to be appended
    ///
    /// # Errors
    ///
    /// - [`ReelError::InvalidConfiguration`] if the payload exceeds the 32-bit size field
    pub fn encode(&self) -> Result<Vec<u8>> {
        let size = u32::try_from(self.data.len()).map_err(|_| {
            ReelError::invalid_configuration(format!(
                "segment payload of {} bytes exceeds the 4 GiB limit",
                self.data.len()
            ))
        })?;

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.kind.marker());
        buf.extend_from_slice(&encode_u32(self.timestamp));
        buf.extend_from_slice(&encode_u32(size));
        buf.extend_from_slice(&encode_tag(&self.tag));
        buf.extend_from_slice(&self.checksum);
        buf.extend_from_slice(&self.data);
        Ok(buf)
    }

    /// Decoded header view of this segment
    pub fn header(&self) -> SegmentHeader {
        SegmentHeader {
            address: self.address,
            kind: self.kind,
            timestamp: self.timestamp,
            size: self.data.len() as u32,
            tag: self.tag.clone(),
            checksum: self.checksum,
        }
    }
}

/// SHA-256 digest of a payload
pub fn compute_checksum(data: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&digest);
    out
}

/// Pad or truncate a tag to the fixed field width.
///
/// Truncation happens on a character boundary so the stored bytes stay valid UTF-8.
pub fn encode_tag(tag: &str) -> [u8; TAG_SIZE] {
    let mut end = tag.len().min(TAG_SIZE);
    while !tag.is_char_boundary(end) {
        end -= 1;
    }
    let mut buf = [0u8; TAG_SIZE];
    buf[..end].copy_from_slice(&tag.as_bytes()[..end]);
    buf
}

/// Decode a tag field, dropping NUL and trailing space padding
pub fn decode_tag(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\0', ' '])
        .to_string()
}

fn read_array<const N: usize>(buf: &[u8], pos: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[pos..pos + N]);
    out
}
