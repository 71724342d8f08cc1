//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Rebuild the keydir on open (hint files, falling back to segment scans)
//! - Append writes to the active segment and index them in the keydir
//! - Serve reads with one keydir lookup and one positioned read
//! - Compact sealed history through merge
//! - Reject every call once the cask is closed

mod merge;

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use parking_lot::Mutex;

use crate::config::{Config, SyncStrategy};
use crate::error::{CaskError, Result};
use crate::hint::write_hint_for_segment;
use crate::keydir::{Keydir, KeydirEntry};
use crate::record;
use crate::recovery::{RecoveryLoader, RecoveryResult};
use crate::segment::{SegmentId, SegmentSet, SegmentWriter};

pub use merge::MergeStats;

/// Name of the advisory lock file inside the cask directory
const LOCK_FILENAME: &str = "LOCK";

/// Outcome of a lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The key holds this value
    Value(Vec<u8>),

    /// The key was deleted and the deletion has not been merged away yet
    Tombstone,

    /// The key is unknown
    NotFound,
}

impl Lookup {
    /// The value, if there is one
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            Lookup::Value(value) => Some(value),
            Lookup::Tombstone | Lookup::NotFound => None,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Lookup::Value(_))
    }

    /// True for both tombstones and unknown keys
    pub fn is_absent(&self) -> bool {
        !self.is_value()
    }
}

/// Lifecycle state of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaskState {
    /// Accepts every operation
    Open,

    /// Terminal; every operation fails with `CaskError::Closed`
    Closed,
}

/// Point-in-time numbers about a cask
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub live_keys: usize,
    pub tombstones: usize,
    pub segment_count: usize,
    pub active_segment: Option<SegmentId>,
    pub disk_bytes: u64,
}

/// State owned by the single writer
struct WriterState {
    /// Segment receiving appends; created on the first write after open,
    /// merge or rotation
    active: Option<SegmentWriter>,

    next_segment_id: SegmentId,

    /// Timestamp of the last record written
    last_timestamp: u64,
}

impl WriterState {
    fn allocate_segment_id(&mut self) -> SegmentId {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        id
    }

    /// Wall-clock nanoseconds, forced to be strictly increasing
    fn next_timestamp(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        self.last_timestamp = now.max(self.last_timestamp + 1);
        self.last_timestamp
    }
}

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete/merge/sync/close): Serialized by `writer`
///   - Only ONE write operation at a time
///   - Lock order: writer → segments → keydir
///
/// - **Reads** (get/list_keys/fold): No writer lock
///   - `get` copies the keydir entry and clones the segment handle under the
///     segment-table read lock, then reads the file with no lock held
///   - Merge repoints the keydir and swaps segments under the segment-table
///     write lock, so a reader never pairs an entry with the wrong segment
///
/// - **Processes**: an exclusive advisory lock on `LOCK` keeps a second
///   process (or a second `Engine` in this one) out of the directory
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Key → location of its latest record (internal RwLock)
    keydir: Keydir,

    /// Open read handles, one per segment (internal RwLock)
    segments: SegmentSet,

    /// Serializes write operations and owns the active segment
    writer: Mutex<WriterState>,

    /// Set once by `close`
    closed: AtomicBool,

    /// Held for the lifetime of the open cask
    dir_lock: Mutex<Option<File>>,

    /// What recovery found when this engine was opened
    recovery: RecoveryResult,
}

impl Engine {
    /// Open or create a cask with the given config
    ///
    /// On startup:
    /// 1. Create the data directory if it doesn't exist
    /// 2. Take the directory lock
    /// 3. Rebuild the keydir from hint files / segment scans
    /// 4. Open a read handle per segment
    ///
    /// No active segment exists until the first write.
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        let dir_lock = Self::acquire_dir_lock(&config.data_dir)?;

        let keydir = Keydir::new();
        let (ids, recovery) = RecoveryLoader::recover(&config.data_dir, &keydir)?;

        let segments = SegmentSet::new(&config.data_dir);
        for &id in &ids {
            segments.open_segment(id)?;
        }

        let writer = WriterState {
            active: None,
            next_segment_id: ids.last().map(|id| id + 1).unwrap_or(1),
            last_timestamp: keydir.max_timestamp(),
        };

        tracing::info!(
            dir = %config.data_dir.display(),
            keys = keydir.live_len(),
            segments = ids.len(),
            "opened cask"
        );

        Ok(Self {
            config,
            keydir,
            segments,
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
            dir_lock: Mutex::new(Some(dir_lock)),
            recovery,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Config::builder().data_dir(path.as_ref()).build())
    }

    /// Look up the current value of `key`
    ///
    /// Deleted keys report `Lookup::Tombstone` until a merge drops them;
    /// unknown keys report `Lookup::NotFound`. Neither is an error.
    pub fn get(&self, key: &[u8]) -> Result<Lookup> {
        self.ensure_open()?;

        let (entry, handle) = {
            let segments = self.segments.read();

            let entry = match self.keydir.lookup(key) {
                Some(entry) => entry,
                None => return Ok(Lookup::NotFound),
            };
            if entry.tombstone {
                return Ok(Lookup::Tombstone);
            }

            let handle = segments
                .get(&entry.segment_id)
                .cloned()
                .ok_or(CaskError::MissingSegment(entry.segment_id))?;
            (entry, handle)
        };

        let record = handle.read_record(key.len(), entry.value_offset, entry.value_len)?;

        if record.key != key {
            return Err(CaskError::Corruption(format!(
                "segment {} offset {} holds a different key",
                entry.segment_id, entry.value_offset
            )));
        }
        if record.tombstone {
            return Err(CaskError::Corruption(format!(
                "segment {} offset {} holds a tombstone for a live key",
                entry.segment_id, entry.value_offset
            )));
        }

        Ok(Lookup::Value(record.value))
    }

    /// Store `value` under `key`
    ///
    /// Oversized keys or values fail with `Encoding` before anything is
    /// written.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.check_sizes(key, value)?;

        let mut state = self.writer.lock();
        self.ensure_open()?;

        self.append_record(&mut state, key, value, false)?;
        Ok(())
    }

    /// Delete `key`
    ///
    /// Appends a tombstone and marks the keydir entry deleted. Deleting a key
    /// that is unknown or already deleted writes nothing.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.check_sizes(key, &[])?;

        let mut state = self.writer.lock();
        self.ensure_open()?;

        match self.keydir.lookup(key) {
            Some(entry) if !entry.tombstone => {
                self.append_record(&mut state, key, &[], true)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Keys that currently hold a value, sorted lexicographically
    ///
    /// Deleted keys are not listed, whether or not a merge has run.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.keydir.live_keys())
    }

    /// Left fold over `list_keys()`
    pub fn fold<B, F>(&self, init: B, mut f: F) -> Result<B>
    where
        F: FnMut(B, &[u8]) -> B,
    {
        let keys = self.list_keys()?;
        Ok(keys.iter().fold(init, |acc, key| f(acc, key.as_slice())))
    }

    /// Left fold over every live (key, value) pair, in `list_keys()` order
    ///
    /// Keys deleted while the fold runs are skipped.
    pub fn fold_entries<B, F>(&self, init: B, mut f: F) -> Result<B>
    where
        F: FnMut(B, &[u8], &[u8]) -> B,
    {
        let mut acc = init;
        for key in self.list_keys()? {
            if let Lookup::Value(value) = self.get(&key)? {
                acc = f(acc, &key, &value);
            }
        }
        Ok(acc)
    }

    /// Flush the active segment to stable storage
    ///
    /// No-op when nothing has been written since the last merge.
    pub fn sync(&self) -> Result<()> {
        self.ensure_open()?;

        let mut state = self.writer.lock();
        self.ensure_open()?;

        if let Some(active) = state.active.as_mut() {
            active.sync()?;
        }
        Ok(())
    }

    /// Compact every segment into one, dropping overwritten and deleted data
    pub fn merge(&self) -> Result<MergeStats> {
        self.ensure_open()?;

        let mut state = self.writer.lock();
        self.ensure_open()?;

        self.merge_locked(&mut state)
    }

    /// Close the cask gracefully
    ///
    /// Syncs, merges (unless `merge_on_close` is off, in which case the
    /// active segment is sealed and given a hint file), releases the
    /// directory lock and moves to `CaskState::Closed`.
    pub fn close(&self) -> Result<()> {
        let mut state = self.writer.lock();
        self.ensure_open()?;

        if let Some(active) = state.active.as_mut() {
            active.sync()?;
        }

        if self.config.merge_on_close {
            self.merge_locked(&mut state)?;
        } else {
            self.seal_active(&mut state, true)?;
        }

        self.closed.store(true, Ordering::Release);
        drop(self.dir_lock.lock().take());

        tracing::info!(dir = %self.config.data_dir.display(), "closed cask");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn state(&self) -> CaskState {
        if self.closed.load(Ordering::Acquire) {
            CaskState::Closed
        } else {
            CaskState::Open
        }
    }

    pub fn stats(&self) -> Result<EngineStats> {
        self.ensure_open()?;

        let active_segment = self.writer.lock().active.as_ref().map(|a| a.id());
        Ok(EngineStats {
            live_keys: self.keydir.live_len(),
            tombstones: self.keydir.tombstone_count(),
            segment_count: self.segments.len(),
            active_segment,
            disk_bytes: self.segments.disk_size()?,
        })
    }

    /// What recovery found when this engine was opened
    pub fn recovery_result(&self) -> &RecoveryResult {
        &self.recovery
    }

    /// Ids of every segment currently on disk, ascending
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.ids()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            CaskState::Open => Ok(()),
            CaskState::Closed => Err(CaskError::Closed),
        }
    }

    fn acquire_dir_lock(dir: &Path) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(dir.join(LOCK_FILENAME))?;

        file.try_lock_exclusive()
            .map_err(|_| CaskError::Locked(dir.to_path_buf()))?;

        Ok(file)
    }

    fn check_sizes(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() > self.config.max_key_size {
            return Err(CaskError::Encoding(format!(
                "key of {} bytes exceeds the {} byte limit",
                key.len(),
                self.config.max_key_size
            )));
        }
        if value.len() > self.config.max_value_size {
            return Err(CaskError::Encoding(format!(
                "value of {} bytes exceeds the {} byte limit",
                value.len(),
                self.config.max_value_size
            )));
        }
        Ok(())
    }

    /// Append one record and index it (called with the writer lock held)
    fn append_record(
        &self,
        state: &mut WriterState,
        key: &[u8],
        value: &[u8],
        tombstone: bool,
    ) -> Result<KeydirEntry> {
        let timestamp = state.next_timestamp();
        let frame = record::encode(key, value, timestamp, tombstone)?;

        let active = self.active_segment_for(state, frame.len() as u64)?;
        let value_offset = match active.append(&frame) {
            Ok(offset) => offset,
            Err(e) => {
                if active.is_poisoned() {
                    // Stays readable; the next write starts a new segment
                    tracing::warn!(segment = active.id(), "abandoning poisoned segment");
                    state.active = None;
                }
                return Err(e);
            }
        };

        let entry = KeydirEntry {
            segment_id: active.id(),
            value_offset,
            value_len: if tombstone { 0 } else { value.len() as u32 },
            timestamp,
            tombstone,
        };

        let should_sync = match self.config.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNWrites { count } => active.unsynced_writes() >= count,
            SyncStrategy::Manual => false,
        };
        if should_sync {
            active.sync()?;
        }

        self.keydir.upsert(key.to_vec(), entry);
        Ok(entry)
    }

    /// The active segment, rotated or created as needed to take `frame_len`
    /// more bytes
    fn active_segment_for<'a>(
        &self,
        state: &'a mut WriterState,
        frame_len: u64,
    ) -> Result<&'a mut SegmentWriter> {
        let needs_rotation = match (self.config.max_segment_size, state.active.as_ref()) {
            (Some(limit), Some(active)) => !active.is_empty() && active.size() + frame_len > limit,
            _ => false,
        };
        if needs_rotation {
            if let Some(id) = self.seal_active(state, true)? {
                tracing::debug!(segment = id, "rotated segment");
            }
        }

        let active = match state.active.take() {
            Some(active) => active,
            None => {
                let id = state.allocate_segment_id();
                let writer = SegmentWriter::create(&self.config.data_dir, id)?;
                // Readable before any keydir entry can point at it
                self.segments.open_segment(id)?;
                writer
            }
        };

        Ok(state.active.insert(active))
    }

    /// Seal the active segment, if there is one
    ///
    /// The sealed segment stays registered for reads. With `write_hint` its
    /// hint file is written right away.
    fn seal_active(&self, state: &mut WriterState, write_hint: bool) -> Result<Option<SegmentId>> {
        let active = match state.active.take() {
            Some(active) => active,
            None => return Ok(None),
        };

        let id = active.seal()?;
        if write_hint {
            write_hint_for_segment(&self.config.data_dir, id)?;
        }
        Ok(Some(id))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.state() == CaskState::Closed {
            return;
        }

        let state = self.writer.get_mut();
        if let Some(active) = state.active.as_mut() {
            if let Err(e) = active.sync() {
                tracing::warn!(segment = active.id(), "failed to sync on drop: {}", e);
            }
        }
    }
}
