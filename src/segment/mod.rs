//! Segment Module
//!
//! Append-only log files. One segment at most is active (open for appends);
//! every other segment is sealed and only ever read.
//!
//! ## Responsibilities
//! - Append encoded frames to the active segment ([`SegmentWriter`])
//! - Serve single-seek reads through cached, shared handles ([`SegmentHandle`])
//! - Replay a segment record by record ([`SegmentScanner`])
//! - Track every open segment of a cask ([`SegmentSet`])
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── 00000000000000000001.data   (sealed segment)
//!   ├── 00000000000000000001.hint   (its hint file)
//!   └── 00000000000000000002.data   (active segment)
//! ```
//!
//! Ids are zero-padded so that lexical order equals chronological order.

mod handle;
mod scanner;
mod set;
mod writer;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub use handle::SegmentHandle;
pub use scanner::{ScannedRecord, SegmentScanner};
pub use set::SegmentSet;
pub use writer::SegmentWriter;

/// Identifier of a segment; strictly increasing over the life of a cask
pub type SegmentId = u64;

pub(crate) const DATA_EXT: &str = "data";
pub(crate) const HINT_EXT: &str = "hint";
pub(crate) const TMP_EXT: &str = "tmp";

/// Path of the data file for segment `id`
pub fn data_path(dir: &Path, id: SegmentId) -> PathBuf {
    dir.join(format!("{:020}.{}", id, DATA_EXT))
}

/// Path of the hint file for segment `id`
pub fn hint_path(dir: &Path, id: SegmentId) -> PathBuf {
    dir.join(format!("{:020}.{}", id, HINT_EXT))
}

/// Parse the segment id out of a data file name
/// "00000000000000000042.data" → Some(42)
pub fn parse_segment_id(path: &Path) -> Option<SegmentId> {
    if path.extension()? != DATA_EXT {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// Ids of every data file in `dir`, ascending
pub fn list_segment_ids(dir: &Path) -> Result<Vec<SegmentId>> {
    let mut ids = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() {
            if let Some(id) = parse_segment_id(&path) {
                ids.push(id);
            }
        }
    }

    ids.sort_unstable();
    Ok(ids)
}
