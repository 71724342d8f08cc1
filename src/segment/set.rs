//! Segment Set
//!
//! The table of open segment handles for one cask.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;

use super::{SegmentHandle, SegmentId};

/// Every readable segment, keyed by id (ascending = oldest first)
///
/// ## Concurrency:
/// - Readers clone an `Arc<SegmentHandle>` under the read lock and do their
///   file I/O after releasing it
/// - Merge swaps segments under the write lock; a retired handle keeps its
///   files alive until the last clone is dropped
pub struct SegmentSet {
    dir: PathBuf,
    segments: RwLock<BTreeMap<SegmentId, Arc<SegmentHandle>>>,
}

pub(crate) type SegmentMap = BTreeMap<SegmentId, Arc<SegmentHandle>>;

impl SegmentSet {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            segments: RwLock::new(BTreeMap::new()),
        }
    }

    /// Open a handle for segment `id` and register it
    pub fn open_segment(&self, id: SegmentId) -> Result<Arc<SegmentHandle>> {
        let handle = Arc::new(SegmentHandle::open(&self.dir, id)?);
        self.segments.write().insert(id, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn get(&self, id: SegmentId) -> Option<Arc<SegmentHandle>> {
        self.segments.read().get(&id).cloned()
    }

    /// Ids of all registered segments, ascending
    pub fn ids(&self) -> Vec<SegmentId> {
        self.segments.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }

    /// Total bytes held by registered data files
    pub fn disk_size(&self) -> Result<u64> {
        let handles: Vec<_> = self.segments.read().values().cloned().collect();
        let mut total = 0;
        for handle in handles {
            total += handle.len()?;
        }
        Ok(total)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, SegmentMap> {
        self.segments.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, SegmentMap> {
        self.segments.write()
    }
}
