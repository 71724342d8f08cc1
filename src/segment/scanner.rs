//! Segment Scanner
//!
//! Sequential iteration over every record of a segment, oldest first.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{CaskError, Result};
use crate::record::{self, Record, RecordHeader, HEADER_SIZE};

use super::{data_path, SegmentId};

/// A record together with where it was found
#[derive(Debug, Clone)]
pub struct ScannedRecord {
    pub record: Record,
    /// Offset of the frame header
    pub frame_offset: u64,
    /// Offset of the value bytes (what the keydir stores)
    pub value_offset: u64,
}

/// Iterator over the records of one segment
///
/// A partial frame at the end of the file (an append cut short by a crash)
/// ends the scan and sets [`truncated`](Self::truncated); it is not an
/// error. The same holds for a last frame that fails its checksum. A checksum
/// failure anywhere else is yielded as `Corruption` and ends the scan.
pub struct SegmentScanner {
    id: SegmentId,
    reader: BufReader<File>,
    /// Offset of the next frame
    offset: u64,
    file_len: u64,
    truncated: bool,
    done: bool,
}

impl SegmentScanner {
    /// Open segment `id` in `dir` for a full scan
    pub fn open(dir: &Path, id: SegmentId) -> Result<Self> {
        let file = File::open(data_path(dir, id))?;
        let file_len = file.metadata()?.len();

        Ok(Self {
            id,
            reader: BufReader::new(file),
            offset: 0,
            file_len,
            truncated: false,
            done: false,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// True once the scan stopped at a partial trailing frame
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Offset just past the last complete frame read so far
    pub fn valid_len(&self) -> u64 {
        self.offset
    }

    fn stop_truncated(&mut self) {
        tracing::warn!(
            segment = self.id,
            offset = self.offset,
            file_len = self.file_len,
            "partial record at end of segment, ignoring tail"
        );
        self.truncated = true;
        self.done = true;
    }

    fn read_next(&mut self) -> Result<Option<ScannedRecord>> {
        let remaining = self.file_len - self.offset;
        if remaining == 0 {
            self.done = true;
            return Ok(None);
        }
        if remaining < HEADER_SIZE as u64 {
            self.stop_truncated();
            return Ok(None);
        }

        let mut frame = vec![0u8; HEADER_SIZE];
        self.reader.read_exact(&mut frame)?;

        let header = RecordHeader::parse(&frame)?;
        let frame_len = header.frame_len();

        if (frame_len as u64) > remaining {
            self.stop_truncated();
            return Ok(None);
        }

        frame.resize(frame_len, 0);
        self.reader.read_exact(&mut frame[HEADER_SIZE..])?;

        let record = match record::decode(&frame) {
            Ok(record) => record,
            // The last frame of the file: its length landed, its bytes did not
            Err(CaskError::Corruption(msg)) if (frame_len as u64) == remaining => {
                tracing::warn!(segment = self.id, offset = self.offset, "torn final record: {}", msg);
                self.stop_truncated();
                return Ok(None);
            }
            Err(CaskError::Corruption(msg)) => {
                return Err(CaskError::Corruption(format!(
                    "segment {} offset {}: {}",
                    self.id, self.offset, msg
                )))
            }
            Err(e) => return Err(e),
        };

        let frame_offset = self.offset;
        self.offset += frame_len as u64;

        Ok(Some(ScannedRecord {
            value_offset: frame_offset + (HEADER_SIZE + record.key.len()) as u64,
            record,
            frame_offset,
        }))
    }
}

impl Iterator for SegmentScanner {
    type Item = Result<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_next() {
            Ok(Some(scanned)) => Some(Ok(scanned)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
