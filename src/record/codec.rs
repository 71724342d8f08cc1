//! Record Codec
//!
//! Encoding and decoding of single log frames.

use bytes::BufMut;
use crc32fast::Hasher;

use crate::error::{CaskError, Result};

use super::{Record, RecordHeader, FLAG_TOMBSTONE, HEADER_SIZE};

/// Encode one record into a frame
///
/// A tombstone ignores `value` and stores no value bytes. Fails with
/// `Encoding` if the key or value length does not fit the 32-bit length
/// fields.
pub fn encode(key: &[u8], value: &[u8], timestamp: u64, tombstone: bool) -> Result<Vec<u8>> {
    let value: &[u8] = if tombstone { &[] } else { value };

    let key_len = u32::try_from(key.len()).map_err(|_| {
        CaskError::Encoding(format!("key of {} bytes overflows the length field", key.len()))
    })?;
    let value_len = u32::try_from(value.len()).map_err(|_| {
        CaskError::Encoding(format!(
            "value of {} bytes overflows the length field",
            value.len()
        ))
    })?;

    let flags = if tombstone { FLAG_TOMBSTONE } else { 0 };

    let mut frame = Vec::with_capacity(HEADER_SIZE + key.len() + value.len());

    // Reserve space for checksum (filled in once the body is written)
    frame.put_u32_le(0);
    frame.put_u64_le(timestamp);
    frame.put_u8(flags);
    frame.put_u32_le(key_len);
    frame.put_u32_le(value_len);
    frame.put_slice(key);
    frame.put_slice(value);

    let crc = checksum(&frame[4..]);
    frame[0..4].copy_from_slice(&crc.to_le_bytes());

    Ok(frame)
}

/// Decode the frame at the start of `bytes`
///
/// Trailing bytes beyond the frame are ignored.
pub fn decode(bytes: &[u8]) -> Result<Record> {
    let header = RecordHeader::parse(bytes)?;
    let frame_len = header.frame_len();

    if bytes.len() < frame_len {
        return Err(CaskError::TruncatedRecord {
            expected: frame_len,
            available: bytes.len(),
        });
    }

    let expected = checksum(&bytes[4..frame_len]);
    if expected != header.checksum {
        return Err(CaskError::Corruption(format!(
            "checksum mismatch: stored {:#010x}, computed {:#010x}",
            header.checksum, expected
        )));
    }

    let key_end = HEADER_SIZE + header.key_len as usize;

    Ok(Record {
        timestamp: header.timestamp,
        tombstone: header.is_tombstone(),
        key: bytes[HEADER_SIZE..key_end].to_vec(),
        value: bytes[key_end..frame_len].to_vec(),
    })
}

fn checksum(body: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(body);
    hasher.finalize()
}
