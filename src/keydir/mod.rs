//! Keydir Module
//!
//! In-memory index from every key to the location of its latest record.
//!
//! ## Responsibilities
//! - O(1) lookup of the current location of a key
//! - Single-writer/multi-reader access pattern
//! - Snapshot iteration for listing and folding
//!
//! ## Data Structure Choice
//! HashMap wrapped in RwLock: keys need no order for lookups, and listings
//! sort their snapshot when a stable order is wanted.
//!
//! The keydir is never persisted. Its durable form is the segments
//! themselves plus their hint files.

mod table;

pub use table::{Keydir, KeydirKeys};

use crate::segment::SegmentId;

/// Location and metadata of the latest record written for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeydirEntry {
    /// Segment holding the record
    pub segment_id: SegmentId,

    /// Absolute offset of the value bytes within the segment
    pub value_offset: u64,

    /// Length of the value (0 for tombstones)
    pub value_len: u32,

    /// Write time of the record
    pub timestamp: u64,

    /// The key was deleted; the marker lives until the next merge
    pub tombstone: bool,
}

impl KeydirEntry {
    /// True when both entries point at the same record on disk
    pub fn same_location(&self, other: &KeydirEntry) -> bool {
        self.segment_id == other.segment_id && self.value_offset == other.value_offset
    }
}
