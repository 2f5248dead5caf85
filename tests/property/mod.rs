//! Property-based testing for srcreel
//!
//! Uses proptest to check replay-chain, lookup and reconstruction invariants
//! across randomly generated recordings.

use ::srcreel::provider::{encode_delta, reconstruct};
use ::srcreel::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Write a recording with the given timestamp gaps and return its timestamps
fn write_recording(dir: &TempDir, gaps: &[u32], spacing: usize) -> (std::path::PathBuf, Vec<u32>) {
    let path = dir.path().join("prop.srcreel");
    let mut writer = SnapshotWriter::create(&path, 0, spacing).unwrap();
    let mut timestamps = Vec::with_capacity(gaps.len());
    let mut now = 0u32;
    for (i, gap) in gaps.iter().enumerate() {
        now += gap;
        let kind = writer.next_kind();
        writer
            .write_segment(kind, now, "", (i as u32).to_le_bytes().to_vec())
            .unwrap();
        timestamps.push(now);
    }
    (path, timestamps)
}

/// Generate random small trees
fn tree_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(
        "[a-c]{1,2}(/[a-c]{1,2})?\\.txt",
        prop::collection::vec(any::<u8>(), 0..32),
        0..6,
    )
}

/// Provider replaying a fixed sequence of trees
struct SequenceProvider {
    trees: Vec<TreeState>,
    next: usize,
    previous: TreeState,
}

impl ContentProvider for SequenceProvider {
    fn produce(&mut self, kind: SegmentKind) -> Result<Vec<u8>> {
        let current = self.trees[self.next.min(self.trees.len() - 1)].clone();
        self.next += 1;
        let payload = match kind {
            SegmentKind::Key => archive::pack_tree_to_vec(&current)?,
            SegmentKind::Diff => encode_delta(&self.previous.diff(&current))?,
        };
        self.previous = current;
        Ok(payload)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_replay_chain_shape(
        gaps in prop::collection::vec(0u32..100, 1..40),
        spacing in 1usize..8,
        pick in any::<prop::sample::Index>(),
    ) {
        let dir = TempDir::new().unwrap();
        let (path, _) = write_recording(&dir, &gaps, spacing);
        let mut reader = SnapshotReader::open(&path).unwrap();
        let addresses = reader.segment_addresses().unwrap();
        let index = pick.index(gaps.len());

        let chain = reader.replayable_segments_until(index).unwrap();
        prop_assert!(chain[0].kind.is_key());
        prop_assert!(chain[1..].iter().all(|s| !s.kind.is_key()));
        prop_assert!(!chain.is_empty() && chain.len() <= spacing);
        prop_assert_eq!(chain.last().unwrap().address, addresses[index]);
        prop_assert_eq!(
            reader.key_index_at_or_before(index).unwrap(),
            index - index % spacing
        );
    }

    #[test]
    fn prop_snapshot_at_matches_addresses(
        gaps in prop::collection::vec(0u32..10, 1..30),
        spacing in 1usize..6,
    ) {
        let dir = TempDir::new().unwrap();
        let (path, _) = write_recording(&dir, &gaps, spacing);
        let mut reader = SnapshotReader::open(&path).unwrap();
        let addresses = reader.segment_addresses().unwrap();
        prop_assert_eq!(addresses.len(), gaps.len());
        for (index, address) in addresses.iter().enumerate() {
            prop_assert_eq!(reader.snapshot_at(index).unwrap().address, *address);
        }
    }

    #[test]
    fn prop_timestamp_lookup(
        gaps in prop::collection::vec(0u32..50, 1..30),
        query in 0u32..1600,
    ) {
        let dir = TempDir::new().unwrap();
        let (path, timestamps) = write_recording(&dir, &gaps, 4);
        let mut reader = SnapshotReader::open(&path).unwrap();

        let expected = timestamps.iter().rposition(|t| *t <= query);
        prop_assert_eq!(reader.index_at_or_before_timestamp(query).unwrap(), expected);
    }

    #[test]
    fn prop_recorded_trees_reconstruct(
        trees in prop::collection::vec(tree_strategy(), 1..12),
        spacing in 1usize..5,
    ) {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("trees.srcreel");
        let states: Vec<TreeState> = trees.into_iter().map(|t| t.into_iter().collect()).collect();
        let count = states.len();

        let provider = SequenceProvider {
            trees: states.clone(),
            next: 0,
            previous: TreeState::new(),
        };
        let mut recorder = RecorderBuilder::new()
            .snapshot_interval(Duration::from_secs(1))
            .key_snapshot_spacing(spacing)
            .time_source(Arc::new(FakeTimeSource::new()))
            .build(provider, &output)
            .unwrap();
        let summary = recorder.start(Duration::from_secs(count as u64)).unwrap();
        recorder.close().unwrap();
        prop_assert_eq!(summary.segments_written, count);

        let mut reader = SnapshotReader::open(&output).unwrap();
        for (index, expected) in states.iter().enumerate() {
            let rebuilt = reconstruct(&reader.replayable_segments_until(index).unwrap()).unwrap();
            prop_assert_eq!(&rebuilt, expected);
        }
    }

    #[test]
    fn prop_scheduled_tick_count(interval_ms in 100u64..5_000, duration_ms in 1u64..60_000) {
        let dir = TempDir::new().unwrap();
        let provider = SequenceProvider {
            trees: vec![TreeState::new()],
            next: 0,
            previous: TreeState::new(),
        };
        let mut recorder = RecorderBuilder::new()
            .snapshot_interval(Duration::from_millis(interval_ms))
            .time_source(Arc::new(FakeTimeSource::new()))
            .build(provider, dir.path().join("ticks.srcreel"))
            .unwrap();

        let summary = recorder.start(Duration::from_millis(duration_ms)).unwrap();
        prop_assert_eq!(summary.segments_written as u64, duration_ms.div_ceil(interval_ms));
    }
}
