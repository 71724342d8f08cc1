//! Segment Writer
//!
//! Appends frames to the active segment.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{CaskError, Result};
use crate::record::{value_offset_in_frame, RecordHeader};

use super::{data_path, SegmentId};

/// Append side of a segment
///
/// The file is opened in append mode and never reopened for writing once
/// `seal` has consumed the writer.
pub struct SegmentWriter {
    id: SegmentId,
    path: PathBuf,
    file: File,
    /// Bytes written so far (= offset of the next frame)
    size: u64,
    /// Appends since the last fsync
    unsynced: usize,
    /// A failed append could not be rolled back; the file end is unknown
    poisoned: bool,
}

impl SegmentWriter {
    /// Create a brand-new segment file
    ///
    /// Fails if a file for `id` already exists.
    pub fn create(dir: &Path, id: SegmentId) -> Result<Self> {
        let path = data_path(dir, id);
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;

        tracing::debug!(segment = id, "created segment {}", path.display());

        Ok(Self {
            id,
            path,
            file,
            size: 0,
            unsynced: 0,
            poisoned: false,
        })
    }

    /// Append an encoded frame
    ///
    /// Returns the absolute offset of the frame's value bytes, which is what
    /// the keydir stores.
    ///
    /// If a failed write cannot be trimmed back off the file, the writer is
    /// poisoned and refuses every later append.
    pub fn append(&mut self, frame: &[u8]) -> Result<u64> {
        if self.poisoned {
            return Err(CaskError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("segment {} is poisoned by a failed append", self.id),
            )));
        }

        let header = RecordHeader::parse(frame)?;
        let frame_offset = self.size;

        if let Err(e) = self.file.write_all(frame) {
            // Drop whatever part of the frame made it to the file
            if let Err(trim) = self.file.set_len(frame_offset) {
                tracing::warn!(
                    segment = self.id,
                    offset = frame_offset,
                    "could not roll back failed append: {}",
                    trim
                );
                self.poisoned = true;
            }
            return Err(e.into());
        }

        self.size += frame.len() as u64;
        self.unsynced += 1;

        Ok(frame_offset + value_offset_in_frame(header.key_len as usize) as u64)
    }

    /// Flush written frames to stable storage
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Make the segment durable and give up write access for good
    pub fn seal(mut self) -> Result<SegmentId> {
        self.file.flush()?;
        self.file.sync_all()?;
        tracing::debug!(segment = self.id, size = self.size, "sealed segment");
        Ok(self.id)
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn unsynced_writes(&self) -> usize {
        self.unsynced
    }

    /// True once an append failed and left bytes of unknown length behind
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}
