//! Append-only segment writer
//!
//! [`SnapshotWriter`] creates a recording, writes its header, and then appends
//! one segment per call. It owns the key/diff decision: write number `n`
//! (counting from zero) is a key segment when `n % key_spacing == 0` and a
//! diff segment otherwise, so the first segment of every recording is a key.
//!
//! Each segment is encoded into one buffer and written with a single
//! `write_all` followed by a flush, so a reader opening the same path sees a
//! prefix of whole segments (plus, at worst, one incomplete tail segment).

use crate::error::{ReelError, Result};
use crate::format::{FileHeader, Segment, SegmentHeader, SegmentKind, HEADER_SIZE};
use crate::provider::ContentProvider;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Writer appending segments to a recording file
#[derive(Debug)]
pub struct SnapshotWriter {
    path: PathBuf,
    file: File,
    header: FileHeader,
    key_spacing: usize,
    /// Segments successfully appended so far
    written: u64,
    /// Offset one past the last complete segment
    end: u64,
    last_timestamp: Option<u32>,
    /// Set after a failed snapshot: the provider may be ahead of the file
    force_key: bool,
}

impl SnapshotWriter {
    /// Create (or truncate) a recording and write its header
    ///
    /// # Arguments
    ///
    /// * `path` - Recording file to create
    /// * `timestamp` - Unix seconds at which the recording starts
    /// * `key_spacing` - Every `key_spacing`-th segment is a key segment (minimum 1)
    ///
    /// # Errors
    ///
    /// - [`ReelError::InvalidConfiguration`] if `key_spacing` is zero
    /// - [`ReelError::Io`] if the file cannot be created or written
    pub fn create(path: impl AsRef<Path>, timestamp: u64, key_spacing: usize) -> Result<Self> {
        if key_spacing == 0 {
            return Err(ReelError::invalid_configuration("key spacing must be at least 1"));
        }

        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let header = FileHeader::new(timestamp);
        file.write_all(&header.encode())?;
        file.flush()?;

        info!("Created recording {:?} (key spacing {})", path, key_spacing);

        Ok(Self {
            path,
            file,
            header,
            key_spacing,
            written: 0,
            end: HEADER_SIZE as u64,
            last_timestamp: None,
            force_key: false,
        })
    }

    /// Path of the recording
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header written at creation
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Configured key spacing
    pub fn key_spacing(&self) -> usize {
        self.key_spacing
    }

    /// Number of segments appended
    pub fn segments_written(&self) -> u64 {
        self.written
    }

    /// Size of the recording in bytes, up to the last complete segment
    pub fn len(&self) -> u64 {
        self.end
    }

    /// Whether no segment has been appended yet
    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Kind the next segment must have
    pub fn next_kind(&self) -> SegmentKind {
        if self.force_key || self.written % self.key_spacing as u64 == 0 {
            SegmentKind::Key
        } else {
            SegmentKind::Diff
        }
    }

    /// Ask `provider` for the next payload and append it
    ///
    /// The provider is asked for full content when [`next_kind`](Self::next_kind)
    /// is a key, and for a delta otherwise. If the provider fails or the
    /// segment is not appended for any reason, the next segment is a key: the
    /// provider has already advanced its baseline past what the file holds.
    ///
    /// # Returns
    ///
    /// The header of the appended segment, including its address.
    pub fn take_snapshot<P>(
        &mut self,
        provider: &mut P,
        timestamp: u32,
        tag: Option<&str>,
    ) -> Result<SegmentHeader>
    where
        P: ContentProvider + ?Sized,
    {
        let kind = self.next_kind();
        let data = provider.produce(kind).inspect_err(|_| {
            self.force_key = true;
        })?;

        let mut segment = Segment::new(kind, timestamp, tag.unwrap_or_default(), data);
        self.append(&mut segment).inspect_err(|_| {
            self.force_key = true;
        })?;
        Ok(segment.header())
    }

    /// Append a segment with a caller-built payload
    ///
    /// `kind` must equal [`next_kind`](Self::next_kind); the writer keeps the
    /// key spacing policy even when the caller builds payloads itself.
    ///
    /// # Returns
    ///
    /// The address of the appended segment.
    ///
    /// # Errors
    ///
    /// - [`ReelError::InvalidState`] if `kind` is not the kind the policy expects next
    /// - [`ReelError::InvalidState`] if `timestamp` is earlier than the previous segment's
    /// - [`ReelError::Io`] if the write fails; the file is rolled back to the
    ///   previous segment boundary and the next segment is forced to be a key
    pub fn write_segment(
        &mut self,
        kind: SegmentKind,
        timestamp: u32,
        tag: &str,
        data: Vec<u8>,
    ) -> Result<u64> {
        let expected = self.next_kind();
        if kind != expected {
            return Err(ReelError::InvalidState(format!(
                "segment #{} must be a {} segment, got {}",
                self.written, expected, kind
            )));
        }

        let mut segment = Segment::new(kind, timestamp, tag, data);
        self.append(&mut segment)?;
        Ok(segment.address)
    }

    /// Force buffered data and metadata to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn append(&mut self, segment: &mut Segment) -> Result<()> {
        if let Some(last) = self.last_timestamp {
            if segment.timestamp < last {
                return Err(ReelError::InvalidState(format!(
                    "segment timestamp {} precedes previous timestamp {}",
                    segment.timestamp, last
                )));
            }
        }

        let bytes = segment.encode()?;
        let address = self.end;

        if let Err(e) = self.file.write_all(&bytes).and_then(|()| self.file.flush()) {
            self.rollback();
            return Err(e.into());
        }

        segment.address = address;
        self.end += bytes.len() as u64;
        self.written += 1;
        self.last_timestamp = Some(segment.timestamp);
        self.force_key = false;

        debug!(
            "Appended {} segment #{} at {} ({} bytes, tag {:?})",
            segment.kind,
            self.written - 1,
            address,
            segment.size(),
            segment.tag
        );
        Ok(())
    }

    fn rollback(&mut self) {
        self.force_key = true;
        if let Err(e) = self
            .file
            .set_len(self.end)
            .and_then(|()| self.file.seek(SeekFrom::Start(self.end)).map(|_| ()))
        {
            warn!("Failed to roll back partial segment in {:?}: {}", self.path, e);
        }
    }
}
