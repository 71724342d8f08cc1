//! Record Module
//!
//! The unit of the append log: one key, one value (or a tombstone), a
//! timestamp and a checksum.
//!
//! ## Frame Format (little-endian)
//! ```text
//! ┌────────────┬───────────────┬───────────┬─────────────┬───────────────┬─────┬───────┐
//! │ CRC32 (4)  │ Timestamp (8) │ Flags (1) │ KeyLen (4)  │ ValueLen (4)  │ Key │ Value │
//! └────────────┴───────────────┴───────────┴─────────────┴───────────────┴─────┴───────┘
//! ```
//!
//! - CRC32 covers every byte after itself (timestamp through value)
//! - Flags bit 0 marks a tombstone; tombstones carry no value bytes
//! - An empty live value (flags = 0, ValueLen = 0) is distinct from a tombstone

mod codec;

use bytes::Buf;

use crate::error::{CaskError, Result};

pub use codec::{decode, encode};

// =============================================================================
// Shared Constants
// =============================================================================

/// Header size: CRC (4) + Timestamp (8) + Flags (1) + KeyLen (4) + ValueLen (4)
pub const HEADER_SIZE: usize = 21;

/// Flag bit marking a deleted key
pub(crate) const FLAG_TOMBSTONE: u8 = 0b0000_0001;

/// Every flag bit this format version understands
pub(crate) const KNOWN_FLAGS: u8 = FLAG_TOMBSTONE;

// =============================================================================
// Record
// =============================================================================

/// A decoded log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Write time, nanoseconds since the Unix epoch (monotonic per cask)
    pub timestamp: u64,

    /// True when this record deletes `key`
    pub tombstone: bool,

    pub key: Vec<u8>,

    /// Always empty for tombstones
    pub value: Vec<u8>,
}

impl Record {
    /// Size of the encoded frame
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.key.len() + self.value.len()
    }
}

/// Offset of the value inside a frame whose key is `key_len` bytes long
pub fn value_offset_in_frame(key_len: usize) -> usize {
    HEADER_SIZE + key_len
}

// =============================================================================
// Record Header
// =============================================================================

/// The fixed-size prefix of a frame, parsed without touching key or value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub checksum: u32,
    pub timestamp: u64,
    pub flags: u8,
    pub key_len: u32,
    pub value_len: u32,
}

impl RecordHeader {
    /// Parse the header at the start of `buf`
    ///
    /// Fails with `TruncatedRecord` if fewer than `HEADER_SIZE` bytes are
    /// available and with `Corruption` on unknown flag bits or a tombstone
    /// that claims to carry a value.
    pub fn parse(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(CaskError::TruncatedRecord {
                expected: HEADER_SIZE,
                available: buf.len(),
            });
        }

        let header = Self {
            checksum: buf.get_u32_le(),
            timestamp: buf.get_u64_le(),
            flags: buf.get_u8(),
            key_len: buf.get_u32_le(),
            value_len: buf.get_u32_le(),
        };

        if header.flags & !KNOWN_FLAGS != 0 {
            return Err(CaskError::Corruption(format!(
                "unknown record flags {:#04x}",
                header.flags
            )));
        }
        if header.is_tombstone() && header.value_len != 0 {
            return Err(CaskError::Corruption(format!(
                "tombstone record declares a {} byte value",
                header.value_len
            )));
        }

        Ok(header)
    }

    pub fn is_tombstone(&self) -> bool {
        self.flags & FLAG_TOMBSTONE != 0
    }

    /// Total size of the frame this header describes
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.key_len as usize + self.value_len as usize
    }
}
