//! Hint Reader
//!
//! Loads and validates a segment's hint file.

use std::fs;
use std::path::Path;

use bytes::Buf;
use crc32fast::Hasher;

use crate::error::{CaskError, Result};
use crate::keydir::KeydirEntry;
use crate::record::{FLAG_TOMBSTONE, KNOWN_FLAGS};
use crate::segment::{hint_path, SegmentId};

use super::{HintEntry, ENTRY_HEADER_SIZE};

/// Read every entry of the hint file for `segment_id`
///
/// Returns `Ok(None)` when the segment has no hint. Any damage (checksum
/// mismatch, truncation, an entry naming another segment) fails the whole
/// file: callers fall back to scanning the segment.
pub fn read_hint(dir: &Path, segment_id: SegmentId) -> Result<Option<Vec<HintEntry>>> {
    let path = hint_path(dir, segment_id);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let (entry, consumed) = parse_entry(&data[pos..], segment_id).map_err(|e| match e {
            CaskError::Corruption(msg) => CaskError::Corruption(format!(
                "hint {} offset {}: {}",
                path.display(),
                pos,
                msg
            )),
            other => other,
        })?;
        entries.push(entry);
        pos += consumed;
    }

    Ok(Some(entries))
}

/// Parse one entry, returning it with the number of bytes it occupied
fn parse_entry(buf: &[u8], segment_id: SegmentId) -> Result<(HintEntry, usize)> {
    if buf.len() < ENTRY_HEADER_SIZE {
        return Err(CaskError::TruncatedRecord {
            expected: ENTRY_HEADER_SIZE,
            available: buf.len(),
        });
    }

    let mut header = &buf[..ENTRY_HEADER_SIZE];
    let checksum = header.get_u32_le();
    let timestamp = header.get_u64_le();
    let flags = header.get_u8();
    let entry_segment = header.get_u64_le();
    let value_offset = header.get_u64_le();
    let value_len = header.get_u32_le();
    let key_len = header.get_u32_le() as usize;

    let total = ENTRY_HEADER_SIZE + key_len;
    if buf.len() < total {
        return Err(CaskError::TruncatedRecord {
            expected: total,
            available: buf.len(),
        });
    }

    let mut hasher = Hasher::new();
    hasher.update(&buf[4..total]);
    let computed = hasher.finalize();
    if computed != checksum {
        return Err(CaskError::Corruption(format!(
            "checksum mismatch: stored {:#010x}, computed {:#010x}",
            checksum, computed
        )));
    }

    if flags & !KNOWN_FLAGS != 0 {
        return Err(CaskError::Corruption(format!("unknown hint flags {:#04x}", flags)));
    }
    if entry_segment != segment_id {
        return Err(CaskError::Corruption(format!(
            "entry names segment {}, expected {}",
            entry_segment, segment_id
        )));
    }

    let entry = HintEntry {
        key: buf[ENTRY_HEADER_SIZE..total].to_vec(),
        entry: KeydirEntry {
            segment_id,
            value_offset,
            value_len,
            timestamp,
            tombstone: flags & FLAG_TOMBSTONE != 0,
        },
    };

    Ok((entry, total))
}
