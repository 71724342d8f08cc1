//! Recovery Loader
//!
//! Rebuilds the keydir when a cask is opened.
//!
//! Segments are replayed in ascending id order, so a later segment's entry
//! for a key replaces an earlier one without comparing timestamps: id order
//! is write order. Each segment contributes through its hint file when one
//! is present and intact, otherwise through a scan of its records.

use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::hint::read_hint;
use crate::keydir::{Keydir, KeydirEntry};
use crate::segment::{self, SegmentId, SegmentScanner, DATA_EXT, HINT_EXT, TMP_EXT};

/// Result of a recovery operation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of segments replayed
    pub segments_loaded: u64,

    /// Segments restored from their hint file
    pub hints_used: u64,

    /// Hint files found damaged and ignored
    pub hints_discarded: u64,

    /// Segments restored by scanning their records
    pub segments_scanned: u64,

    /// Hint entries plus scanned records applied to the keydir
    pub entries_loaded: u64,

    /// Segments whose last record was only partially written
    pub truncated_segments: u64,

    /// Leftover temp files and orphaned hints removed
    pub stale_files_removed: u64,

    /// Highest segment id found
    pub last_segment_id: Option<SegmentId>,
}

/// Rebuilds keydirs from what is on disk
pub struct RecoveryLoader;

impl RecoveryLoader {
    /// Populate `keydir` from every segment in `dir`
    ///
    /// Also removes leftovers of interrupted hint writes. Returns the ids of
    /// the segments found, ascending.
    pub fn recover(dir: &Path, keydir: &Keydir) -> Result<(Vec<SegmentId>, RecoveryResult)> {
        let mut result = RecoveryResult {
            stale_files_removed: Self::remove_stale_files(dir)?,
            ..RecoveryResult::default()
        };

        let ids = segment::list_segment_ids(dir)?;

        for &id in &ids {
            Self::load_segment(dir, id, keydir, true, &mut result)?;
        }
        result.last_segment_id = ids.last().copied();

        if result.segments_loaded > 0 {
            tracing::info!(
                segments = result.segments_loaded,
                hints = result.hints_used,
                scanned = result.segments_scanned,
                entries = result.entries_loaded,
                keys = keydir.len(),
                "recovered keydir"
            );
        }

        Ok((ids, result))
    }

    /// Check every record of every segment without touching hints or files
    ///
    /// Fails on the first corrupted record.
    pub fn verify(dir: &Path) -> Result<RecoveryResult> {
        let keydir = Keydir::new();
        let mut result = RecoveryResult::default();

        let ids = segment::list_segment_ids(dir)?;
        for &id in &ids {
            Self::load_segment(dir, id, &keydir, false, &mut result)?;
        }
        result.last_segment_id = ids.last().copied();

        Ok(result)
    }

    fn load_segment(
        dir: &Path,
        id: SegmentId,
        keydir: &Keydir,
        use_hint: bool,
        result: &mut RecoveryResult,
    ) -> Result<()> {
        result.segments_loaded += 1;

        if use_hint {
            match read_hint(dir, id) {
                Ok(Some(entries)) => {
                    for hint in entries {
                        keydir.upsert(hint.key, hint.entry);
                        result.entries_loaded += 1;
                    }
                    result.hints_used += 1;
                    return Ok(());
                }
                Ok(None) => {}
                Err(e) if e.is_integrity_error() => {
                    tracing::warn!(segment = id, "discarding damaged hint file: {}", e);
                    result.hints_discarded += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let mut scanner = SegmentScanner::open(dir, id)?;
        for scanned in scanner.by_ref() {
            let scanned = scanned?;
            let record = scanned.record;
            keydir.upsert(
                record.key,
                KeydirEntry {
                    segment_id: id,
                    value_offset: scanned.value_offset,
                    value_len: record.value.len() as u32,
                    timestamp: record.timestamp,
                    tombstone: record.tombstone,
                },
            );
            result.entries_loaded += 1;
        }

        result.segments_scanned += 1;
        if scanner.truncated() {
            result.truncated_segments += 1;
        }

        Ok(())
    }

    /// Remove `*.tmp` files and hints whose data file is gone
    fn remove_stale_files(dir: &Path) -> Result<u64> {
        let mut removed = 0;

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            let stale = match path.extension().and_then(|ext| ext.to_str()) {
                Some(ext) if ext == TMP_EXT => true,
                Some(ext) if ext == HINT_EXT => !path.with_extension(DATA_EXT).exists(),
                _ => false,
            };

            if stale {
                tracing::debug!("removing stale file {}", path.display());
                fs::remove_file(&path)?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}
