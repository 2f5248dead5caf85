//! Random-access and sequential reading of recordings
//!
//! [`SnapshotReader`] owns one open file handle. Its read position doubles as
//! an iteration cursor over segment addresses:
//!
//! - [`has_next`](SnapshotReader::has_next) / [`next_address`](SnapshotReader::next_address)
//!   walk segments by reading only each segment's size field
//! - [`read_segment_by_address`](SnapshotReader::read_segment_by_address) decodes and
//!   verifies one segment and puts the cursor back where it was
//! - the index-based lookups (`snapshot_at`, `replayable_segments_until`, ...)
//!   rewind, scan and rewind again, so they leave the cursor at the first segment
//!
//! ## Replay chains
//!
//! A diff segment only makes sense on top of the content reconstructed from
//! every segment since the nearest preceding key segment. The chain returned by
//! [`replayable_segments_until`](SnapshotReader::replayable_segments_until)
//! is that key followed by its diffs, in the order they must be applied. With
//! a key spacing of `N` the chain is never longer than `N`.
//!
//! ```rust,no_run
//! use srcreel::SnapshotReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut reader = SnapshotReader::open("session.srcreel")?;
//! let chain = reader.replayable_segments_until(7)?;
//! assert!(chain[0].kind.is_key());
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! A reader is `Send` but every method takes `&mut self`: the cursor cannot be
//! shared. Open one reader per thread.

use crate::error::{ReelError, Result};
use crate::format::{
    FileHeader, Segment, SegmentHeader, SegmentKind, HEADER_SIZE, SEGMENT_HEADER_SIZE,
    SIZE_FIELD_SIZE, SIZE_OFFSET,
};
use crate::codec::bytes_to_int;
use crate::verification::{verify_recording, VerificationReport};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

/// How [`SnapshotReader::snapshots`] treats segments that fail validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BulkReadPolicy {
    /// Fail the whole read on the first corrupt or malformed segment
    #[default]
    Strict,
    /// Substitute an empty key placeholder for each corrupt segment and stop
    /// quietly at a truncated tail
    Lenient,
}

/// Reader over a recording file
#[derive(Debug)]
pub struct SnapshotReader {
    path: PathBuf,
    file: File,
    header: FileHeader,
}

impl SnapshotReader {
    /// Open a recording and validate its header
    ///
    /// The cursor is left at the first segment.
    ///
    /// # Errors
    ///
    /// - [`ReelError::Io`] if the file cannot be opened
    /// - [`ReelError::InvalidHeader`] if the file is shorter than the header or
    ///   the magic bytes do not match
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let header = read_file_header(&mut file)?;
        info!("Opened recording {:?} (started at {})", path, header.timestamp);
        Ok(Self { path, file, header })
    }

    /// Path of the recording
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header read when the reader was opened or last reset
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Rewind the cursor to the first segment, re-validating the header
    pub fn reset(&mut self) -> Result<()> {
        self.header = read_file_header(&mut self.file)?;
        Ok(())
    }

    /// Current cursor position
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    fn file_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Whether the cursor is before end of file
    pub fn has_next(&mut self) -> Result<bool> {
        Ok(self.position()? < self.file_len()?)
    }

    /// Return the address under the cursor and advance past that segment
    ///
    /// Only the size field is read; the payload is neither loaded nor verified.
    ///
    /// # Errors
    ///
    /// - [`ReelError::TruncatedSegment`] if the segment extends past end of file;
    ///   the cursor does not move in that case
    pub fn next_address(&mut self) -> Result<u64> {
        let address = self.position()?;
        let available = self.file_len()?.saturating_sub(address);

        let truncated = |needed: u64| ReelError::TruncatedSegment {
            address,
            needed,
            available,
        };

        if available < SEGMENT_HEADER_SIZE as u64 {
            return Err(truncated(SEGMENT_HEADER_SIZE as u64));
        }

        self.file.seek(SeekFrom::Start(address + SIZE_OFFSET as u64))?;
        let mut size = [0u8; SIZE_FIELD_SIZE];
        self.file.read_exact(&mut size)?;
        let needed = SEGMENT_HEADER_SIZE as u64 + bytes_to_int(size) as u64;

        if available < needed {
            self.file.seek(SeekFrom::Start(address))?;
            return Err(truncated(needed));
        }

        self.file.seek(SeekFrom::Start(address + needed))?;
        trace!("Skipped segment at {} ({} bytes)", address, needed);
        Ok(address)
    }

    /// Advance past the segment under the cursor
    pub fn skip(&mut self) -> Result<()> {
        self.next_address().map(|_| ())
    }

    /// Decode the segment under the cursor and advance past it
    pub fn next_segment(&mut self) -> Result<Segment> {
        let address = self.next_address()?;
        self.read_segment_by_address(address)
    }

    /// Decode and verify the segment at `address`
    ///
    /// The cursor is restored afterwards, whether or not decoding succeeds.
    ///
    /// # Errors
    ///
    /// - [`ReelError::ChecksumMismatch`] if the payload does not match its checksum
    /// - [`ReelError::UnknownSegmentType`] / [`ReelError::TruncatedSegment`] if
    ///   no well-formed segment starts at `address`
    pub fn read_segment_by_address(&mut self, address: u64) -> Result<Segment> {
        self.with_saved_position(|reader| reader.decode_segment(address))
    }

    /// Decode only the fixed header of the segment at `address`
    ///
    /// The payload is not verified. The cursor is restored afterwards.
    pub fn read_segment_header(&mut self, address: u64) -> Result<SegmentHeader> {
        self.with_saved_position(|reader| reader.decode_segment_header(address))
    }

    /// Addresses of every segment, in file order
    pub fn segment_addresses(&mut self) -> Result<Vec<u64>> {
        self.reset()?;
        let mut addresses = Vec::new();
        while self.has_next()? {
            addresses.push(self.next_address()?);
        }
        self.reset()?;
        Ok(addresses)
    }

    /// Number of segments in the recording
    pub fn segment_count(&mut self) -> Result<usize> {
        Ok(self.segment_addresses()?.len())
    }

    /// Fixed headers of every segment, without loading payloads
    pub fn segment_headers(&mut self) -> Result<Vec<SegmentHeader>> {
        let addresses = self.segment_addresses()?;
        addresses
            .into_iter()
            .map(|address| self.read_segment_header(address))
            .collect()
    }

    /// Decode the segment at `index`
    ///
    /// # Errors
    ///
    /// - [`ReelError::SegmentNotFound`] if `index` is not below the segment count
    pub fn snapshot_at(&mut self, index: usize) -> Result<Segment> {
        self.reset()?;
        let result = self.seek_to_index(index).and_then(|()| self.next_segment());
        self.reset()?;
        result
    }

    /// Decode segments with indices in `start..end`
    pub fn snapshots_by_range(&mut self, start: usize, end: usize) -> Result<Vec<Segment>> {
        self.reset()?;
        let result = self.collect_range(start, end);
        self.reset()?;
        result
    }

    /// Index of the latest key segment at or before `index`
    ///
    /// Only segment headers are read.
    ///
    /// # Errors
    ///
    /// - [`ReelError::SegmentNotFound`] if `index` is past the end of the recording
    /// - [`ReelError::MissingKeySegment`] if no key segment precedes `index`
    pub fn key_index_at_or_before(&mut self, index: usize) -> Result<usize> {
        self.reset()?;
        let result = self.scan_for_key(index);
        self.reset()?;
        result
    }

    /// Segments needed to reconstruct the content as of `index`
    ///
    /// Returns a key segment followed by the diffs up to and including
    /// `index`, in application order. A key segment at `index` is returned alone.
    pub fn replayable_segments_until(&mut self, index: usize) -> Result<Vec<Segment>> {
        let target = self.snapshot_at(index)?;
        let chain = match target.kind {
            SegmentKind::Key => vec![target],
            SegmentKind::Diff => {
                let key_index = self.key_index_at_or_before(index)?;
                let mut chain = self.snapshots_by_range(key_index, index)?;
                chain.push(target);
                chain
            }
        };
        debug!("Replay chain for segment {} has {} segments", index, chain.len());
        Ok(chain)
    }

    /// Index of the last segment whose timestamp does not exceed `timestamp`
    ///
    /// Returns `None` when the recording is empty or its first segment is
    /// already later than `timestamp`.
    pub fn index_at_or_before_timestamp(&mut self, timestamp: u32) -> Result<Option<usize>> {
        self.reset()?;
        let result = self.scan_timestamps(timestamp);
        self.reset()?;
        result
    }

    /// Decode every segment in file order
    ///
    /// Under [`BulkReadPolicy::Lenient`] a segment failing checksum or
    /// structural validation is replaced by [`Segment::placeholder`], and a
    /// truncated final segment ends the listing. I/O errors always propagate.
    pub fn snapshots(&mut self, policy: BulkReadPolicy) -> Result<Vec<Segment>> {
        self.reset()?;
        let result = self.collect_all(policy);
        self.reset()?;
        result
    }

    /// Check every segment's structure and checksum
    pub fn verify(&mut self) -> Result<VerificationReport> {
        verify_recording(self)
    }

    fn collect_all(&mut self, policy: BulkReadPolicy) -> Result<Vec<Segment>> {
        let lenient = policy == BulkReadPolicy::Lenient;
        let mut segments = Vec::new();

        while self.has_next()? {
            let address = match self.next_address() {
                Ok(address) => address,
                Err(e) if lenient && e.is_format_error() => {
                    warn!("Stopping bulk read at incomplete segment: {}", e);
                    break;
                }
                Err(e) => return Err(e),
            };

            match self.read_segment_by_address(address) {
                Ok(segment) => segments.push(segment),
                Err(e) if lenient && (e.is_corruption() || e.is_format_error()) => {
                    warn!("Substituting placeholder for segment at {}: {}", address, e);
                    segments.push(Segment::placeholder(address));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(segments)
    }

    fn seek_to_index(&mut self, index: usize) -> Result<()> {
        for skipped in 0..index {
            if !self.has_next()? {
                return Err(ReelError::SegmentNotFound {
                    index,
                    count: skipped,
                });
            }
            self.skip()?;
        }
        if !self.has_next()? {
            return Err(ReelError::SegmentNotFound { index, count: index });
        }
        Ok(())
    }

    fn collect_range(&mut self, start: usize, end: usize) -> Result<Vec<Segment>> {
        let mut segments = Vec::with_capacity(end.saturating_sub(start));
        for index in 0..end {
            if !self.has_next()? {
                return Err(ReelError::SegmentNotFound { index, count: index });
            }
            if index >= start {
                segments.push(self.next_segment()?);
            } else {
                self.skip()?;
            }
        }
        Ok(segments)
    }

    fn scan_for_key(&mut self, index: usize) -> Result<usize> {
        let mut key_index = None;
        for current in 0..=index {
            if !self.has_next()? {
                return Err(ReelError::SegmentNotFound {
                    index,
                    count: current,
                });
            }
            let address = self.next_address()?;
            match self.read_segment_header(address)?.kind {
                SegmentKind::Key => key_index = Some(current),
                SegmentKind::Diff => {}
            }
        }
        key_index.ok_or(ReelError::MissingKeySegment(index))
    }

    fn scan_timestamps(&mut self, timestamp: u32) -> Result<Option<usize>> {
        let mut found = None;
        let mut index = 0;
        while self.has_next()? {
            let address = self.next_address()?;
            if self.read_segment_header(address)?.timestamp > timestamp {
                break;
            }
            found = Some(index);
            index += 1;
        }
        Ok(found)
    }

    fn decode_segment_header(&mut self, address: u64) -> Result<SegmentHeader> {
        let available = self.file_len()?.saturating_sub(address);
        if available < SEGMENT_HEADER_SIZE as u64 {
            return Err(ReelError::TruncatedSegment {
                address,
                needed: SEGMENT_HEADER_SIZE as u64,
                available,
            });
        }

        self.file.seek(SeekFrom::Start(address))?;
        let mut buf = [0u8; SEGMENT_HEADER_SIZE];
        self.file.read_exact(&mut buf)?;
        let header = SegmentHeader::decode(address, &buf)?;

        if available < header.encoded_len() {
            return Err(ReelError::TruncatedSegment {
                address,
                needed: header.encoded_len(),
                available,
            });
        }
        Ok(header)
    }

    fn decode_segment(&mut self, address: u64) -> Result<Segment> {
        let header = self.decode_segment_header(address)?;
        let mut data = vec![0u8; header.size as usize];
        self.file.read_exact(&mut data)?;

        let segment = Segment::from_parts(header, data);
        segment.verify()?;
        trace!(
            "Read {} segment at {} ({} bytes, tag {:?})",
            segment.kind,
            address,
            segment.size(),
            segment.tag
        );
        Ok(segment)
    }

    fn with_saved_position<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let saved = self.position()?;
        let result = f(self);
        self.file.seek(SeekFrom::Start(saved))?;
        result
    }
}

fn read_file_header(file: &mut File) -> Result<FileHeader> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; HEADER_SIZE];
    file.read_exact(&mut buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => ReelError::invalid_header("file is shorter than the header"),
        _ => ReelError::Io(e),
    })?;
    FileHeader::decode(&buf)
}
