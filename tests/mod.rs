//! Main test module for srcreel
//!
//! This module includes all test suites:
//! - Integration tests for recording, replay and damaged files
//! - Property-based tests for replay-chain and lookup invariants

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::srcreel::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_recording() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.srcreel");
        SnapshotWriter::create(&path, 42, 5).unwrap();

        let mut reader = SnapshotReader::open(&path).unwrap();
        assert_eq!(reader.segment_count().unwrap(), 0);
        assert!(reader.snapshots(BulkReadPolicy::Strict).unwrap().is_empty());
        assert_eq!(reader.index_at_or_before_timestamp(1000).unwrap(), None);
        assert!(matches!(
            reader.snapshot_at(0),
            Err(ReelError::SegmentNotFound { index: 0, count: 0 })
        ));
        assert!(reader.verify().unwrap().is_valid());
    }

    #[test]
    fn test_not_a_recording() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.txt");

        fs::write(&path, "these are not the bytes you are looking for").unwrap();
        let err = SnapshotReader::open(&path).unwrap_err();
        assert!(matches!(err, ReelError::InvalidHeader(_)));
        assert!(err.is_format_error());

        // Shorter than a header
        fs::write(&path, b"SRC").unwrap();
        assert!(matches!(
            SnapshotReader::open(&path),
            Err(ReelError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_empty_and_long_tags() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tags.srcreel");
        let mut writer = SnapshotWriter::create(&path, 0, 5).unwrap();

        let long_tag = "ä".repeat(40);
        writer.write_segment(SegmentKind::Key, 0, "", b"x".to_vec()).unwrap();
        writer.write_segment(SegmentKind::Diff, 1, &long_tag, b"y".to_vec()).unwrap();

        let mut reader = SnapshotReader::open(&path).unwrap();
        assert_eq!(reader.snapshot_at(0).unwrap().tag, "");
        // Truncated to 64 bytes on a character boundary
        assert_eq!(reader.snapshot_at(1).unwrap().tag, "ä".repeat(32));
    }

    #[test]
    fn test_empty_payloads() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty-payload.srcreel");
        let mut writer = SnapshotWriter::create(&path, 0, 2).unwrap();
        writer.write_segment(SegmentKind::Key, 0, "start", Vec::new()).unwrap();
        writer.write_segment(SegmentKind::Diff, 0, "", Vec::new()).unwrap();

        let mut reader = SnapshotReader::open(&path).unwrap();
        let chain = reader.replayable_segments_until(1).unwrap();
        assert_eq!(chain.len(), 2);
        assert!(chain.iter().all(|s| s.data.is_empty() && s.is_data_valid()));
    }
}
