//! Segment Handle
//!
//! Cached read access to one segment, shared through `Arc`.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CaskError, Result};
use crate::record::{self, Record, HEADER_SIZE};

use super::{data_path, hint_path, SegmentId};

/// Read side of a segment
///
/// Seeking needs exclusive access to the file position, so the reader sits
/// behind a mutex; the lock is only held for one seek + read.
///
/// A retired handle deletes its data and hint files when the last `Arc`
/// pointing at it is dropped.
pub struct SegmentHandle {
    id: SegmentId,
    dir: PathBuf,
    file: Mutex<BufReader<File>>,
    retired: AtomicBool,
    /// Next newer retired segment, released only after this one's files are
    /// gone
    newer: Mutex<Option<Arc<SegmentHandle>>>,
}

impl SegmentHandle {
    /// Open segment `id` in `dir` for reading
    pub fn open(dir: &Path, id: SegmentId) -> Result<Self> {
        let file = match File::open(data_path(dir, id)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CaskError::MissingSegment(id))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            id,
            dir: dir.to_path_buf(),
            file: Mutex::new(BufReader::new(file)),
            retired: AtomicBool::new(false),
            newer: Mutex::new(None),
        })
    }

    /// Read exactly `length` bytes starting at `offset`
    ///
    /// Fails with `Io` if the file ends before the requested range does.
    pub fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; length];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read and verify the record whose value lives at `value_offset`
    ///
    /// The frame start is derived from the key length, so the whole frame is
    /// fetched with a single seek and its checksum validated before anything
    /// is returned.
    pub fn read_record(&self, key_len: usize, value_offset: u64, value_len: u32) -> Result<Record> {
        let frame_offset = value_offset
            .checked_sub((HEADER_SIZE + key_len) as u64)
            .ok_or_else(|| {
                CaskError::Corruption(format!(
                    "value offset {} in segment {} leaves no room for a header",
                    value_offset, self.id
                ))
            })?;
        let frame_len = HEADER_SIZE + key_len + value_len as usize;

        let frame = self.read(frame_offset, frame_len)?;

        let record = match record::decode(&frame) {
            Ok(record) => record,
            Err(CaskError::TruncatedRecord { expected, available }) => {
                return Err(CaskError::Corruption(format!(
                    "record at offset {} in segment {} declares {} bytes, index expects {}",
                    frame_offset, self.id, expected, available
                )))
            }
            Err(e) => return Err(e),
        };

        if record.key.len() != key_len || record.value.len() != value_len as usize {
            return Err(CaskError::Corruption(format!(
                "record at offset {} in segment {} does not match its index entry",
                frame_offset, self.id
            )));
        }

        Ok(record)
    }

    /// Schedule the segment's files for deletion once no reader holds it
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    /// Retire this segment ahead of `newer`
    ///
    /// `newer` cannot be removed before this segment is, so a chain of
    /// retired segments leaves the disk oldest first. Whatever subset
    /// survives a crash is then the newest part of the chain.
    pub fn retire_before(&self, newer: Arc<SegmentHandle>) {
        *self.newer.lock() = Some(newer);
        self.retire();
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Current size of the data file
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.lock().get_ref().metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn path(&self) -> PathBuf {
        data_path(&self.dir, self.id)
    }
}

impl Drop for SegmentHandle {
    fn drop(&mut self) {
        if !self.is_retired() {
            return;
        }

        // Hint first: a data file without a hint is still recoverable
        let mut removed = true;
        for path in [hint_path(&self.dir, self.id), data_path(&self.dir, self.id)] {
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!("removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("failed to remove {}: {}", path.display(), e);
                    removed = false;
                }
            }
        }

        // Only now may the newer segment go. If this one is still on disk,
        // the newer one has to stay there too.
        if let Some(newer) = self.newer.get_mut().take() {
            if removed {
                drop(newer);
            } else {
                std::mem::forget(newer);
            }
        }
    }
}
