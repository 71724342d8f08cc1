//! Tests for segment files
//!
//! These tests verify:
//! - Appends return the offset of the value bytes
//! - Handles read exact ranges and verified records
//! - The scanner replays records and stops at a truncated tail
//! - Retired segments disappear only when the last handle is dropped

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use caskkv::record::{self, HEADER_SIZE};
use caskkv::segment::{
    self, data_path, hint_path, parse_segment_id, SegmentHandle, SegmentScanner, SegmentSet,
    SegmentWriter,
};
use caskkv::CaskError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn write_segment(dir: &TempDir, id: u64, records: &[(&[u8], &[u8])]) -> Vec<u64> {
    let mut writer = SegmentWriter::create(dir.path(), id).unwrap();
    let offsets = records
        .iter()
        .enumerate()
        .map(|(i, (k, v))| {
            let frame = record::encode(k, v, i as u64 + 1, false).unwrap();
            writer.append(&frame).unwrap()
        })
        .collect();
    writer.seal().unwrap();
    offsets
}

// =============================================================================
// Naming Tests
// =============================================================================

#[test]
fn test_segment_names_sort_chronologically() {
    let dir = TempDir::new().unwrap();
    let a = data_path(dir.path(), 9);
    let b = data_path(dir.path(), 10);

    assert!(a.file_name().unwrap() < b.file_name().unwrap());
    assert_eq!(parse_segment_id(&a), Some(9));
    assert_eq!(parse_segment_id(&b), Some(10));
    assert_eq!(parse_segment_id(&hint_path(dir.path(), 9)), None);
}

#[test]
fn test_list_segment_ids_ignores_other_files() {
    let dir = TempDir::new().unwrap();
    write_segment(&dir, 3, &[(b"a", b"1")]);
    write_segment(&dir, 1, &[(b"b", b"2")]);
    std::fs::write(dir.path().join("LOCK"), b"").unwrap();
    std::fs::write(hint_path(dir.path(), 1), b"").unwrap();

    assert_eq!(segment::list_segment_ids(dir.path()).unwrap(), vec![1, 3]);
}

// =============================================================================
// Writer Tests
// =============================================================================

#[test]
fn test_append_returns_value_offset() {
    let dir = TempDir::new().unwrap();
    let mut writer = SegmentWriter::create(dir.path(), 1).unwrap();

    let first = record::encode(b"k1", b"v1", 1, false).unwrap();
    let second = record::encode(b"key2", b"value2", 2, false).unwrap();

    assert_eq!(writer.append(&first).unwrap(), (HEADER_SIZE + 2) as u64);
    assert_eq!(
        writer.append(&second).unwrap(),
        (first.len() + HEADER_SIZE + 4) as u64
    );
    assert_eq!(writer.size(), (first.len() + second.len()) as u64);
    assert_eq!(writer.unsynced_writes(), 2);

    writer.sync().unwrap();
    assert_eq!(writer.unsynced_writes(), 0);
}

#[test]
fn test_create_refuses_existing_segment() {
    let dir = TempDir::new().unwrap();
    write_segment(&dir, 1, &[(b"a", b"1")]);

    assert!(SegmentWriter::create(dir.path(), 1).is_err());
}

// =============================================================================
// Handle Tests
// =============================================================================

#[test]
fn test_handle_reads_value_range() {
    let dir = TempDir::new().unwrap();
    let offsets = write_segment(&dir, 1, &[(b"a", b"apple"), (b"b", b"banana")]);

    let handle = SegmentHandle::open(dir.path(), 1).unwrap();
    assert_eq!(handle.read(offsets[1], 6).unwrap(), b"banana");
    assert_eq!(handle.read(offsets[0], 5).unwrap(), b"apple");
}

#[test]
fn test_handle_read_past_end_is_io_error() {
    let dir = TempDir::new().unwrap();
    let offsets = write_segment(&dir, 1, &[(b"a", b"apple")]);

    let handle = SegmentHandle::open(dir.path(), 1).unwrap();
    assert!(matches!(handle.read(offsets[0], 100), Err(CaskError::Io(_))));
}

#[test]
fn test_handle_read_record_validates_checksum() {
    let dir = TempDir::new().unwrap();
    let offsets = write_segment(&dir, 1, &[(b"a", b"apple")]);

    let handle = SegmentHandle::open(dir.path(), 1).unwrap();
    let record = handle.read_record(1, offsets[0], 5).unwrap();
    assert_eq!(record.value, b"apple");

    // Flip a value byte on disk
    let path = data_path(dir.path(), 1);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[offsets[0] as usize] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let handle = SegmentHandle::open(dir.path(), 1).unwrap();
    assert!(matches!(
        handle.read_record(1, offsets[0], 5),
        Err(CaskError::Corruption(_))
    ));
}

#[test]
fn test_handle_read_record_rejects_mismatched_index() {
    let dir = TempDir::new().unwrap();
    let offsets = write_segment(&dir, 1, &[(b"a", b"apple"), (b"b", b"banana")]);

    let handle = SegmentHandle::open(dir.path(), 1).unwrap();
    // Right offset, wrong length
    assert!(matches!(
        handle.read_record(1, offsets[0], 4),
        Err(CaskError::Corruption(_))
    ));
}

#[test]
fn test_open_missing_segment() {
    let dir = TempDir::new().unwrap();

    assert!(matches!(
        SegmentHandle::open(dir.path(), 77),
        Err(CaskError::MissingSegment(77))
    ));
}

#[test]
fn test_retired_segment_removed_after_last_reader() {
    let dir = TempDir::new().unwrap();
    write_segment(&dir, 1, &[(b"a", b"apple")]);
    std::fs::write(hint_path(dir.path(), 1), b"").unwrap();

    let handle = Arc::new(SegmentHandle::open(dir.path(), 1).unwrap());
    let reader = Arc::clone(&handle);

    handle.retire();
    drop(handle);

    // Still held by a reader
    assert!(data_path(dir.path(), 1).exists());
    assert_eq!(reader.read(HEADER_SIZE as u64 + 1, 5).unwrap(), b"apple");

    drop(reader);
    assert!(!data_path(dir.path(), 1).exists());
    assert!(!hint_path(dir.path(), 1).exists());
}

/// Retire `handles` (oldest first) the way merge does
fn retire_chain(handles: Vec<Arc<SegmentHandle>>) {
    let mut chain: Option<Arc<SegmentHandle>> = None;
    for handle in handles.into_iter().rev() {
        match chain.take() {
            Some(newer) => handle.retire_before(newer),
            None => handle.retire(),
        }
        chain = Some(handle);
    }
}

fn open_handles(dir: &TempDir, ids: &[u64]) -> Vec<Arc<SegmentHandle>> {
    ids.iter()
        .map(|&id| {
            write_segment(dir, id, &[(b"k", b"v")]);
            Arc::new(SegmentHandle::open(dir.path(), id).unwrap())
        })
        .collect()
}

#[test]
fn test_reader_on_oldest_retired_segment_keeps_newer_ones() {
    let dir = TempDir::new().unwrap();
    let handles = open_handles(&dir, &[1, 2, 3]);
    let reader = Arc::clone(&handles[0]);

    retire_chain(handles);

    // Nothing newer may go while segment 1 is still on disk
    for id in 1..=3 {
        assert!(data_path(dir.path(), id).exists());
    }

    drop(reader);
    for id in 1..=3 {
        assert!(!data_path(dir.path(), id).exists());
    }
}

#[test]
fn test_reader_on_newest_retired_segment_lets_older_ones_go() {
    let dir = TempDir::new().unwrap();
    let handles = open_handles(&dir, &[1, 2, 3]);
    let reader = Arc::clone(&handles[2]);

    retire_chain(handles);

    assert!(!data_path(dir.path(), 1).exists());
    assert!(!data_path(dir.path(), 2).exists());
    assert!(data_path(dir.path(), 3).exists());

    drop(reader);
    assert!(!data_path(dir.path(), 3).exists());
}

#[test]
fn test_unretired_segment_survives_drop() {
    let dir = TempDir::new().unwrap();
    write_segment(&dir, 1, &[(b"a", b"apple")]);

    drop(SegmentHandle::open(dir.path(), 1).unwrap());
    assert!(data_path(dir.path(), 1).exists());
}

// =============================================================================
// Scanner Tests
// =============================================================================

#[test]
fn test_scanner_replays_in_order() {
    let dir = TempDir::new().unwrap();
    let offsets = write_segment(&dir, 1, &[(b"a", b"1"), (b"b", b"22"), (b"a", b"333")]);

    let scanned: Vec<_> = SegmentScanner::open(dir.path(), 1)
        .unwrap()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(scanned.len(), 3);
    assert_eq!(scanned[0].frame_offset, 0);
    assert_eq!(scanned[2].record.key, b"a");
    assert_eq!(scanned[2].record.value, b"333");
    for (s, offset) in scanned.iter().zip(offsets) {
        assert_eq!(s.value_offset, offset);
    }
}

#[test]
fn test_scanner_stops_at_truncated_tail() {
    let dir = TempDir::new().unwrap();
    write_segment(&dir, 1, &[(b"a", b"1"), (b"b", b"2")]);

    // Simulate a crash in the middle of the next append
    let partial = record::encode(b"c", b"three", 3, false).unwrap();
    let mut file = OpenOptions::new()
        .append(true)
        .open(data_path(dir.path(), 1))
        .unwrap();
    file.write_all(&partial[..partial.len() - 3]).unwrap();

    let mut scanner = SegmentScanner::open(dir.path(), 1).unwrap();
    let keys: Vec<_> = scanner.by_ref().map(|r| r.unwrap().record.key).collect();

    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    assert!(scanner.truncated());
}

#[test]
fn test_scanner_stops_at_partial_header() {
    let dir = TempDir::new().unwrap();
    write_segment(&dir, 1, &[(b"a", b"1")]);

    let mut file = OpenOptions::new()
        .append(true)
        .open(data_path(dir.path(), 1))
        .unwrap();
    file.write_all(&[0u8; 5]).unwrap();

    let mut scanner = SegmentScanner::open(dir.path(), 1).unwrap();
    assert_eq!(scanner.by_ref().count(), 1);
    assert!(scanner.truncated());
}

#[test]
fn test_scanner_reports_corruption() {
    let dir = TempDir::new().unwrap();
    let offsets = write_segment(&dir, 1, &[(b"a", b"1"), (b"b", b"2")]);

    let path = data_path(dir.path(), 1);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[offsets[0] as usize] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let mut scanner = SegmentScanner::open(dir.path(), 1).unwrap();
    assert!(matches!(scanner.next(), Some(Err(CaskError::Corruption(_)))));
    assert!(scanner.next().is_none());
}

#[test]
fn test_scanner_treats_torn_final_record_as_truncated() {
    let dir = TempDir::new().unwrap();
    write_segment(&dir, 1, &[(b"a", b"1"), (b"b", b"2")]);

    let path = data_path(dir.path(), 1);
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let mut scanner = SegmentScanner::open(dir.path(), 1).unwrap();
    let keys: Vec<_> = scanner.by_ref().map(|r| r.unwrap().record.key).collect();

    assert_eq!(keys, vec![b"a".to_vec()]);
    assert!(scanner.truncated());
}

// =============================================================================
// Segment Set Tests
// =============================================================================

#[test]
fn test_segment_set_tracks_handles() {
    let dir = TempDir::new().unwrap();
    write_segment(&dir, 2, &[(b"a", b"1")]);
    write_segment(&dir, 1, &[(b"b", b"2")]);

    let set = SegmentSet::new(dir.path());
    assert!(set.is_empty());

    set.open_segment(2).unwrap();
    set.open_segment(1).unwrap();

    assert_eq!(set.ids(), vec![1, 2]);
    assert_eq!(set.len(), 2);
    assert!(set.get(2).is_some());
    assert!(set.get(3).is_none());

    let expected = std::fs::metadata(data_path(dir.path(), 1)).unwrap().len()
        + std::fs::metadata(data_path(dir.path(), 2)).unwrap().len();
    assert_eq!(set.disk_size().unwrap(), expected);
}
