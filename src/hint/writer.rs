//! Hint Writer
//!
//! Writes the hint file of a sealed segment.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::BufMut;
use crc32fast::Hasher;

use crate::error::{CaskError, Result};
use crate::keydir::KeydirEntry;
use crate::record::FLAG_TOMBSTONE;
use crate::segment::{hint_path, SegmentId, SegmentScanner, TMP_EXT};

use super::ENTRY_HEADER_SIZE;

/// Builder for a segment's hint file
///
/// Entries go to `<id>.hint.tmp`; `finish()` fsyncs and renames it into
/// place. Dropping the writer without finishing leaves only the temp file,
/// which the next open removes.
pub struct HintWriter {
    segment_id: SegmentId,
    tmp_path: PathBuf,
    final_path: PathBuf,
    writer: BufWriter<File>,
    entry_count: u64,
}

impl HintWriter {
    pub fn create(dir: &Path, segment_id: SegmentId) -> Result<Self> {
        let final_path = hint_path(dir, segment_id);
        let tmp_path = final_path.with_extension(format!("hint.{}", TMP_EXT));

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        Ok(Self {
            segment_id,
            tmp_path,
            final_path,
            writer: BufWriter::new(file),
            entry_count: 0,
        })
    }

    /// Append one entry; it must belong to this writer's segment
    pub fn add(&mut self, key: &[u8], entry: &KeydirEntry) -> Result<()> {
        if entry.segment_id != self.segment_id {
            return Err(CaskError::Encoding(format!(
                "hint for segment {} given an entry of segment {}",
                self.segment_id, entry.segment_id
            )));
        }
        let key_len = u32::try_from(key.len()).map_err(|_| {
            CaskError::Encoding(format!("key of {} bytes overflows the length field", key.len()))
        })?;

        let mut buf = Vec::with_capacity(ENTRY_HEADER_SIZE + key.len());

        // Reserve space for checksum
        buf.put_u32_le(0);
        buf.put_u64_le(entry.timestamp);
        buf.put_u8(if entry.tombstone { FLAG_TOMBSTONE } else { 0 });
        buf.put_u64_le(entry.segment_id);
        buf.put_u64_le(entry.value_offset);
        buf.put_u32_le(entry.value_len);
        buf.put_u32_le(key_len);
        buf.put_slice(key);

        let mut hasher = Hasher::new();
        hasher.update(&buf[4..]);
        let crc = hasher.finalize();
        buf[0..4].copy_from_slice(&crc.to_le_bytes());

        self.writer.write_all(&buf)?;
        self.entry_count += 1;
        Ok(())
    }

    /// Make the hint durable and give it its final name
    ///
    /// Returns the number of entries written.
    pub fn finish(self) -> Result<u64> {
        let file = self.writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.tmp_path, &self.final_path)?;
        sync_dir(self.final_path.parent())?;

        tracing::debug!(
            segment = self.segment_id,
            entries = self.entry_count,
            "wrote hint file"
        );
        Ok(self.entry_count)
    }
}

/// Scan a sealed segment and write its hint file
///
/// Only the last record of each key within the segment is kept, in the order
/// the records appear in the file. A truncated tail is left out.
pub fn write_hint_for_segment(dir: &Path, segment_id: SegmentId) -> Result<u64> {
    let mut latest: HashMap<Vec<u8>, KeydirEntry> = HashMap::new();

    for scanned in SegmentScanner::open(dir, segment_id)? {
        let scanned = scanned?;
        let record = scanned.record;
        latest.insert(
            record.key,
            KeydirEntry {
                segment_id,
                value_offset: scanned.value_offset,
                value_len: record.value.len() as u32,
                timestamp: record.timestamp,
                tombstone: record.tombstone,
            },
        );
    }

    let mut entries: Vec<_> = latest.into_iter().collect();
    entries.sort_unstable_by_key(|(_, e)| e.value_offset);

    let mut writer = HintWriter::create(dir, segment_id)?;
    for (key, entry) in &entries {
        writer.add(key, entry)?;
    }
    writer.finish()
}

#[cfg(unix)]
fn sync_dir(dir: Option<&Path>) -> Result<()> {
    if let Some(dir) = dir {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: Option<&Path>) -> Result<()> {
    Ok(())
}
