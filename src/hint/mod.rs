//! Hint File Module
//!
//! Compact per-segment snapshot of keydir entries, so that opening a cask
//! does not require replaying every data record.
//!
//! ## File Format (little-endian)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ Entry (repeated)                                                    │
//! │   CRC32 (4) | Timestamp (8) | Flags (1) | SegmentId (8)             │
//! │   ValueOffset (8) | ValueLen (4) | KeyLen (4) | Key                 │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - CRC32 covers every byte of the entry after itself
//! - Flags bit 0 marks a tombstone
//! - Files are written as `<id>.hint.tmp` and renamed once durable, so a
//!   half-written hint never carries the final name
//!
//! A hint is only an accelerator. A missing or damaged hint costs a full
//! scan of its segment, never data.

mod reader;
mod writer;

pub use reader::read_hint;
pub use writer::{write_hint_for_segment, HintWriter};

use crate::keydir::KeydirEntry;

/// Entry header: CRC (4) + Timestamp (8) + Flags (1) + SegmentId (8)
/// + ValueOffset (8) + ValueLen (4) + KeyLen (4)
pub const ENTRY_HEADER_SIZE: usize = 37;

/// One key and where its record lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintEntry {
    pub key: Vec<u8>,
    pub entry: KeydirEntry,
}
