//! Tests for keydir recovery
//!
//! These tests verify:
//! - Hint files are used when present and intact
//! - Missing or damaged hints fall back to scanning the segment
//! - A partially written last record is ignored
//! - Later segments win over earlier ones
//! - Leftover temp files are cleaned up

use std::fs::OpenOptions;
use std::io::Write;

use caskkv::keydir::Keydir;
use caskkv::record;
use caskkv::segment::{data_path, hint_path};
use caskkv::{CaskError, Config, Engine, Lookup, RecoveryLoader, SyncStrategy};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config(dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(dir.path())
        .sync_strategy(SyncStrategy::EveryWrite)
        .merge_on_close(false)
        .build()
}

fn rotating_config(dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(dir.path())
        .sync_strategy(SyncStrategy::EveryWrite)
        .max_segment_size(64)
        .merge_on_close(false)
        .build()
}

/// Write a few keys and close without merging, leaving sealed segments with
/// hint files
fn populate(dir: &TempDir) {
    let engine = Engine::open(config(dir)).unwrap();
    engine.put(b"apple", b"red").unwrap();
    engine.put(b"banana", b"yellow").unwrap();
    engine.put(b"cherry", b"dark").unwrap();
    engine.put(b"apple", b"green").unwrap();
    engine.delete(b"cherry").unwrap();
    engine.close().unwrap();
}

fn assert_populated(engine: &Engine) {
    assert_eq!(engine.get(b"apple").unwrap(), Lookup::Value(b"green".to_vec()));
    assert_eq!(engine.get(b"banana").unwrap(), Lookup::Value(b"yellow".to_vec()));
    assert_eq!(engine.get(b"cherry").unwrap(), Lookup::Tombstone);
    assert_eq!(
        engine.list_keys().unwrap(),
        vec![b"apple".to_vec(), b"banana".to_vec()]
    );
}

// =============================================================================
// Hint Tests
// =============================================================================

#[test]
fn test_reopen_uses_hint() {
    let dir = TempDir::new().unwrap();
    populate(&dir);
    assert!(hint_path(dir.path(), 1).exists());

    let engine = Engine::open(config(&dir)).unwrap();
    let result = engine.recovery_result();

    assert_eq!(result.segments_loaded, 1);
    assert_eq!(result.hints_used, 1);
    assert_eq!(result.segments_scanned, 0);
    // One hint entry per key, not per record
    assert_eq!(result.entries_loaded, 3);
    assert_populated(&engine);
}

#[test]
fn test_missing_hint_falls_back_to_scan() {
    let dir = TempDir::new().unwrap();
    populate(&dir);
    std::fs::remove_file(hint_path(dir.path(), 1)).unwrap();

    let engine = Engine::open(config(&dir)).unwrap();
    let result = engine.recovery_result();

    assert_eq!(result.hints_used, 0);
    assert_eq!(result.segments_scanned, 1);
    assert_eq!(result.entries_loaded, 5);
    assert_populated(&engine);
}

#[test]
fn test_damaged_hint_is_discarded() {
    let dir = TempDir::new().unwrap();
    populate(&dir);

    let path = hint_path(dir.path(), 1);
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let engine = Engine::open(config(&dir)).unwrap();
    let result = engine.recovery_result();

    assert_eq!(result.hints_discarded, 1);
    assert_eq!(result.segments_scanned, 1);
    assert_populated(&engine);
}

#[test]
fn test_drop_without_close_recovers_by_scan() {
    let dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config(&dir)).unwrap();
        engine.put(b"k1", b"v1").unwrap();
        engine.put(b"k2", b"v2").unwrap();
        engine.delete(b"k1").unwrap();
    }
    assert!(!hint_path(dir.path(), 1).exists());

    let engine = Engine::open(config(&dir)).unwrap();
    assert_eq!(engine.recovery_result().segments_scanned, 1);
    assert_eq!(engine.get(b"k1").unwrap(), Lookup::Tombstone);
    assert_eq!(engine.get(b"k2").unwrap(), Lookup::Value(b"v2".to_vec()));
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_later_segment_wins() {
    let dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(rotating_config(&dir)).unwrap();
        for i in 0..10 {
            engine.put(b"counter", format!("{}", i).as_bytes()).unwrap();
            engine.put(format!("filler{}", i).as_bytes(), b"xxxxxxxxxx").unwrap();
        }
        engine.delete(b"filler0").unwrap();
        assert!(engine.segment_ids().len() > 1);
    }

    let engine = Engine::open(rotating_config(&dir)).unwrap();
    assert!(engine.recovery_result().segments_loaded > 1);
    assert_eq!(engine.get(b"counter").unwrap(), Lookup::Value(b"9".to_vec()));
    assert_eq!(engine.get(b"filler0").unwrap(), Lookup::Tombstone);
    assert_eq!(engine.get(b"filler9").unwrap(), Lookup::Value(b"xxxxxxxxxx".to_vec()));
}

#[test]
fn test_mixed_hints_and_scans_agree() {
    let dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(rotating_config(&dir)).unwrap();
        for i in 0..20 {
            engine.put(format!("key{:02}", i).as_bytes(), format!("v{}", i).as_bytes()).unwrap();
        }
        for i in 0..20 {
            engine.put(format!("key{:02}", i).as_bytes(), format!("w{}", i).as_bytes()).unwrap();
        }
    }

    // Rotated segments got hints; the last one did not
    let ids = caskkv::segment::list_segment_ids(dir.path()).unwrap();
    let last = *ids.last().unwrap();
    assert!(hint_path(dir.path(), ids[0]).exists());
    assert!(!hint_path(dir.path(), last).exists());

    let engine = Engine::open(rotating_config(&dir)).unwrap();
    let result = engine.recovery_result();
    assert_eq!(result.hints_used + result.segments_scanned, ids.len() as u64);
    assert_eq!(result.last_segment_id, Some(last));

    for i in 0..20 {
        assert_eq!(
            engine.get(format!("key{:02}", i).as_bytes()).unwrap(),
            Lookup::Value(format!("w{}", i).into_bytes())
        );
    }
}

// =============================================================================
// Damage Tests
// =============================================================================

#[test]
fn test_truncated_tail_is_ignored() {
    let dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config(&dir)).unwrap();
        engine.put(b"k1", b"v1").unwrap();
        engine.put(b"k2", b"v2").unwrap();
    }

    // Crash in the middle of appending a third record
    let partial = record::encode(b"k3", b"v3", u64::MAX, false).unwrap();
    let mut file = OpenOptions::new()
        .append(true)
        .open(data_path(dir.path(), 1))
        .unwrap();
    file.write_all(&partial[..partial.len() / 2]).unwrap();
    drop(file);

    let engine = Engine::open(config(&dir)).unwrap();
    assert_eq!(engine.recovery_result().truncated_segments, 1);
    assert_eq!(engine.get(b"k1").unwrap(), Lookup::Value(b"v1".to_vec()));
    assert_eq!(engine.get(b"k2").unwrap(), Lookup::Value(b"v2".to_vec()));
    assert_eq!(engine.get(b"k3").unwrap(), Lookup::NotFound);

    // New writes land in a fresh segment
    engine.put(b"k3", b"v3").unwrap();
    assert_eq!(engine.get(b"k3").unwrap(), Lookup::Value(b"v3".to_vec()));
    assert_eq!(engine.stats().unwrap().active_segment, Some(2));
}

#[test]
fn test_torn_final_record_is_ignored() {
    let dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config(&dir)).unwrap();
        engine.put(b"k1", b"v1").unwrap();
        engine.put(b"k2", b"v2").unwrap();
        engine.put(b"k1", b"v9").unwrap();
    }

    // Full length on disk, last bytes never made it
    let path = data_path(dir.path(), 1);
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let engine = Engine::open(config(&dir)).unwrap();
    assert_eq!(engine.recovery_result().truncated_segments, 1);
    assert_eq!(engine.get(b"k1").unwrap(), Lookup::Value(b"v1".to_vec()));
    assert_eq!(engine.get(b"k2").unwrap(), Lookup::Value(b"v2".to_vec()));
}

#[test]
fn test_corrupted_record_fails_open() {
    let dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config(&dir)).unwrap();
        engine.put(b"k1", b"v1").unwrap();
        engine.put(b"k2", b"v2").unwrap();
    }

    let path = data_path(dir.path(), 1);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[record::HEADER_SIZE] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        Engine::open(config(&dir)),
        Err(CaskError::Corruption(_))
    ));
}

#[test]
fn test_stale_files_removed() {
    let dir = TempDir::new().unwrap();
    populate(&dir);

    let tmp = dir.path().join("00000000000000000001.hint.tmp");
    std::fs::write(&tmp, b"half a hint").unwrap();
    let orphan = hint_path(dir.path(), 9);
    std::fs::write(&orphan, b"").unwrap();

    let engine = Engine::open(config(&dir)).unwrap();
    assert_eq!(engine.recovery_result().stale_files_removed, 2);
    assert!(!tmp.exists());
    assert!(!orphan.exists());
    assert_populated(&engine);
}

#[test]
fn test_recover_into_keydir() {
    let dir = TempDir::new().unwrap();
    populate(&dir);

    let keydir = Keydir::new();
    let (ids, result) = RecoveryLoader::recover(dir.path(), &keydir).unwrap();

    assert_eq!(ids, vec![1]);
    assert_eq!(result.last_segment_id, Some(1));
    assert_eq!(keydir.len(), 3);
    assert_eq!(keydir.tombstone_count(), 1);
}

#[test]
fn test_empty_directory() {
    let dir = TempDir::new().unwrap();

    let keydir = Keydir::new();
    let (ids, result) = RecoveryLoader::recover(dir.path(), &keydir).unwrap();

    assert!(ids.is_empty());
    assert_eq!(result.last_segment_id, None);
    assert!(keydir.is_empty());
}

// =============================================================================
// Verify Tests
// =============================================================================

#[test]
fn test_verify_counts_every_record() {
    let dir = TempDir::new().unwrap();
    populate(&dir);

    let result = RecoveryLoader::verify(dir.path()).unwrap();
    assert_eq!(result.segments_loaded, 1);
    assert_eq!(result.hints_used, 0);
    assert_eq!(result.entries_loaded, 5);
}

#[test]
fn test_verify_reports_corruption() {
    let dir = TempDir::new().unwrap();
    populate(&dir);

    // First record's key; the last record would count as a torn tail
    let path = data_path(dir.path(), 1);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[record::HEADER_SIZE] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let err = RecoveryLoader::verify(dir.path()).unwrap_err();
    assert!(err.is_integrity_error());
}
