//! Integration tests for srcreel
//!
//! Covers replay chains on real files, damaged recordings, readers running
//! alongside a writer, and recorders driven by the system clock from other
//! threads.

use ::srcreel::provider::reconstruct;
use ::srcreel::*;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::info;

/// Recording on disk with payloads `payload-<i>` at timestamps `10 * i`
pub struct RecordingFixture {
    pub temp_dir: TempDir,
    pub path: PathBuf,
    pub addresses: Vec<u64>,
}

impl RecordingFixture {
    pub fn new(count: usize, key_spacing: usize) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fixture.srcreel");
        let mut writer = SnapshotWriter::create(&path, 1_700_000_000, key_spacing).unwrap();

        let mut addresses = Vec::with_capacity(count);
        for i in 0..count {
            let kind = writer.next_kind();
            let tag = if i % 4 == 0 { format!("tag-{}", i) } else { String::new() };
            let address = writer
                .write_segment(kind, 10 * i as u32, &tag, format!("payload-{}", i).into_bytes())
                .unwrap();
            addresses.push(address);
        }
        info!("Created fixture with {} segments", count);

        Self {
            temp_dir,
            path,
            addresses,
        }
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader::open(&self.path).unwrap()
    }

    /// Flip one bit in the payload of segment `index`
    pub fn corrupt_payload(&self, index: usize) {
        let offset = self.addresses[index] + format::SEGMENT_HEADER_SIZE as u64;
        flip_bit(&self.path, offset);
    }
}

fn flip_bit(path: &Path, offset: u64) {
    let bytes = fs::read(path).unwrap();
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&[bytes[offset as usize] ^ 0x01]).unwrap();
}

#[test]
fn test_key_spacing_and_replay_chains() {
    let fixture = RecordingFixture::new(12, 5);
    let mut reader = fixture.reader();

    let headers = reader.segment_headers().unwrap();
    let keys: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.kind.is_key())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(keys, vec![0, 5, 10]);

    assert_eq!(reader.key_index_at_or_before(7).unwrap(), 5);
    assert_eq!(reader.key_index_at_or_before(5).unwrap(), 5);
    assert_eq!(reader.key_index_at_or_before(4).unwrap(), 0);

    let chain = reader.replayable_segments_until(7).unwrap();
    let payloads: Vec<&[u8]> = chain.iter().map(|s| s.data.as_slice()).collect();
    assert_eq!(payloads, vec![&b"payload-5"[..], b"payload-6", b"payload-7"]);

    let chain = reader.replayable_segments_until(10).unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].data, b"payload-10");

    assert!(matches!(
        reader.replayable_segments_until(12),
        Err(ReelError::SegmentNotFound { index: 12, count: 12 })
    ));
}

#[test]
fn test_index_lookups_agree_with_addresses() {
    let fixture = RecordingFixture::new(9, 3);
    let mut reader = fixture.reader();

    assert_eq!(reader.segment_addresses().unwrap(), fixture.addresses);
    for (index, address) in fixture.addresses.iter().enumerate() {
        let segment = reader.snapshot_at(index).unwrap();
        assert_eq!(segment.address, *address);
        assert_eq!(reader.read_segment_by_address(*address).unwrap(), segment);
    }

    let range = reader.snapshots_by_range(2, 5).unwrap();
    let timestamps: Vec<u32> = range.iter().map(|s| s.timestamp).collect();
    assert_eq!(timestamps, vec![20, 30, 40]);
    assert!(reader.snapshots_by_range(4, 4).unwrap().is_empty());
}

#[test]
fn test_cursor_survives_random_access() {
    let fixture = RecordingFixture::new(4, 2);
    let mut reader = fixture.reader();

    let first = reader.next_address().unwrap();
    let position = reader.position().unwrap();

    reader.read_segment_by_address(fixture.addresses[3]).unwrap();
    reader.read_segment_header(fixture.addresses[2]).unwrap();
    assert_eq!(reader.position().unwrap(), position);

    assert_eq!(first, fixture.addresses[0]);
    assert_eq!(reader.next_address().unwrap(), fixture.addresses[1]);
}

#[test]
fn test_corrupt_payload_detection() {
    let fixture = RecordingFixture::new(6, 5);
    fixture.corrupt_payload(2);
    let mut reader = fixture.reader();

    let err = reader.read_segment_by_address(fixture.addresses[2]).unwrap_err();
    assert!(err.is_corruption());
    assert!(matches!(err, ReelError::ChecksumMismatch { address, .. } if address == fixture.addresses[2]));

    // Headers are still readable without touching the payload
    assert_eq!(reader.segment_count().unwrap(), 6);

    assert!(reader.snapshots(BulkReadPolicy::Strict).unwrap_err().is_corruption());
    let segments = reader.snapshots(BulkReadPolicy::Lenient).unwrap();
    assert_eq!(segments.len(), 6);
    assert_eq!(segments[2], Segment::placeholder(fixture.addresses[2]));
    assert_eq!(segments[3].data, b"payload-3");

    let report = reader.verify().unwrap();
    assert!(!report.is_valid());
    assert_eq!(report.corrupt_segments, vec![fixture.addresses[2]]);
    assert_eq!(report.valid_segments, 5);

    // Chains not passing through the damaged segment still replay
    assert!(reader.replayable_segments_until(1).is_ok());
    assert!(reader.replayable_segments_until(4).unwrap_err().is_corruption());
}

#[test]
fn test_unknown_marker() {
    let fixture = RecordingFixture::new(3, 5);
    let mut bytes = fs::read(&fixture.path).unwrap();
    let at = fixture.addresses[1] as usize;
    bytes[at..at + 6].copy_from_slice(b"BOGUS!");
    fs::write(&fixture.path, bytes).unwrap();

    let mut reader = fixture.reader();
    let err = reader.snapshot_at(1).unwrap_err();
    assert!(matches!(err, ReelError::UnknownSegmentType { .. }));
    assert!(err.is_format_error());

    let segments = reader.snapshots(BulkReadPolicy::Lenient).unwrap();
    assert_eq!(segments.len(), 3);
    assert_eq!(segments[1].address, fixture.addresses[1]);
    assert_eq!(reader.verify().unwrap().unreadable_segments, vec![fixture.addresses[1]]);
}

#[test]
fn test_reader_sees_segments_appended_later() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("live.srcreel");
    let mut writer = SnapshotWriter::create(&path, 0, 2).unwrap();
    writer.write_segment(SegmentKind::Key, 0, "", b"a".to_vec()).unwrap();

    let mut reader = SnapshotReader::open(&path).unwrap();
    assert_eq!(reader.segment_count().unwrap(), 1);

    writer.write_segment(SegmentKind::Diff, 5, "", b"b".to_vec()).unwrap();
    writer.write_segment(SegmentKind::Key, 9, "", b"c".to_vec()).unwrap();
    assert_eq!(reader.segment_count().unwrap(), 3);
    assert_eq!(reader.index_at_or_before_timestamp(7).unwrap(), Some(1));
}

#[test]
fn test_stop_from_another_thread() {
    let project = TempDir::new().unwrap();
    fs::write(project.path().join("main.rs"), "fn main() {}").unwrap();
    let out = TempDir::new().unwrap();
    let output = out.path().join("live.srcreel");

    let provider = DirectoryProvider::new(project.path(), ProviderConfig::default()).unwrap();
    let mut recorder = RecorderBuilder::new()
        .snapshot_interval(Duration::from_millis(20))
        .build(provider, &output)
        .unwrap();

    let handle = recorder.handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        handle.stop();
    });

    let started = Instant::now();
    let summary = recorder.start(Duration::from_secs(3600)).unwrap();
    stopper.join().unwrap();
    recorder.close().unwrap();

    assert!(summary.stopped_by_request);
    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(summary.segments_written >= 1);

    let mut reader = SnapshotReader::open(&output).unwrap();
    assert_eq!(reader.segment_count().unwrap(), summary.segments_written);
    assert!(reader.verify().unwrap().is_valid());
    assert!(!lock::lock_path_for(&output).exists());
}

#[test]
fn test_tag_wakes_a_long_sleep() {
    let project = TempDir::new().unwrap();
    fs::write(project.path().join("a.txt"), "before").unwrap();
    let out = TempDir::new().unwrap();
    let output = out.path().join("tagged.srcreel");

    let provider = DirectoryProvider::new(project.path(), ProviderConfig::default()).unwrap();
    let mut recorder = RecorderBuilder::new()
        .snapshot_interval(Duration::from_secs(3600))
        .time_source(Arc::new(SystemMonotonicTimeSource::new()))
        .build(provider, &output)
        .unwrap();

    let handle = recorder.handle();
    let root = project.path().to_path_buf();
    let tagger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        fs::write(root.join("a.txt"), "after").unwrap();
        handle.tag_current_state("edited");
        thread::sleep(Duration::from_millis(100));
        handle.stop();
    });

    let summary = recorder.start(Duration::from_secs(7200)).unwrap();
    tagger.join().unwrap();
    recorder.close().unwrap();

    assert_eq!(summary.segments_written, 2);
    assert_eq!(summary.tags_applied, vec!["edited".to_string()]);

    let mut reader = SnapshotReader::open(&output).unwrap();
    let tagged = reader.snapshot_at(1).unwrap();
    assert_eq!(tagged.tag, "edited");
    assert_eq!(tagged.kind, SegmentKind::Diff);

    let tree = reconstruct(&reader.replayable_segments_until(1).unwrap()).unwrap();
    assert_eq!(tree.get("a.txt"), Some(&b"after"[..]));
    let tree = reconstruct(&reader.replayable_segments_until(0).unwrap()).unwrap();
    assert_eq!(tree.get("a.txt"), Some(&b"before"[..]));
}

#[test]
fn test_two_recorders_one_output() {
    let project = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let output = out.path().join("shared.srcreel");

    let first = DirectoryProvider::new(project.path(), ProviderConfig::default()).unwrap();
    let mut first = RecorderBuilder::new()
        .snapshot_interval(Duration::from_millis(10))
        .build(first, &output)
        .unwrap();
    let first_handle = first.handle();

    let running = thread::spawn(move || {
        let summary = first.start(Duration::from_secs(60));
        first.close().unwrap();
        summary
    });

    // Wait for the first recorder to claim the output
    let lock_path = lock::lock_path_for(&output);
    let deadline = Instant::now() + Duration::from_secs(10);
    while !lock_path.exists() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    let second = DirectoryProvider::new(project.path(), ProviderConfig::default()).unwrap();
    let mut second = RecorderBuilder::new().build(second, &output).unwrap();
    assert!(matches!(
        second.start(Duration::from_secs(1)),
        Err(ReelError::RecordingLocked(_))
    ));

    first_handle.stop();
    assert!(running.join().unwrap().unwrap().stopped_by_request);
    assert!(!lock_path.exists());
}
