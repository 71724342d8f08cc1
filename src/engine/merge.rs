//! Merge
//!
//! Compacts the sealed history of a cask into a single fresh segment.
//!
//! ## Steps
//! 1. Seal the active segment so every segment is immutable
//! 2. Pass 1: scan segments oldest → newest, remembering only the location
//!    of the latest record per key
//! 3. Pass 2: copy each winning record into a new segment, unless the keydir
//!    says the key is deleted (dropped) or has moved on (skipped)
//! 4. Seal the new segment and write its hint file
//! 5. Swap keydir entries and segments in one step, then retire the old
//!    segments; their files disappear oldest first, once no reader holds
//!    them

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::sync::Arc;

use crate::error::{CaskError, Result};
use crate::hint::HintWriter;
use crate::keydir::KeydirEntry;
use crate::record;
use crate::segment::{
    data_path, hint_path, SegmentHandle, SegmentId, SegmentScanner, SegmentWriter,
};

use super::{Engine, WriterState};

/// What a merge did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeStats {
    /// Segments consumed (and retired)
    pub segments_merged: u64,

    /// Records read during the first pass
    pub records_scanned: u64,

    /// Live records copied to the output segment
    pub records_written: u64,

    /// Deleted keys dropped from the cask for good
    pub tombstones_dropped: u64,

    /// Latest-in-segment records the keydir no longer points at
    pub superseded_skipped: u64,

    /// Segment produced by the merge; `None` when nothing was live
    pub output_segment: Option<SegmentId>,

    /// Bytes held by segments before and after the merge
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// Staged keydir changes, applied only once the output is durable
struct MergePlan {
    repoints: Vec<(Vec<u8>, KeydirEntry)>,
    dropped: Vec<Vec<u8>>,
    output: Option<SegmentId>,
}

impl Engine {
    /// Merge with the writer lock held
    pub(super) fn merge_locked(&self, state: &mut WriterState) -> Result<MergeStats> {
        self.seal_active(state, false)?;

        let sealed = self.segments.ids();
        let mut stats = MergeStats::default();
        if sealed.is_empty() {
            return Ok(stats);
        }

        stats.segments_merged = sealed.len() as u64;
        stats.bytes_before = self.segments.disk_size()?;

        let latest = self.latest_locations(&sealed, &mut stats)?;

        let output_id = state.allocate_segment_id();
        let plan = match self.write_output(output_id, &sealed, latest, &mut stats) {
            Ok(plan) => plan,
            Err(e) => {
                discard_output(self, output_id);
                return Err(e);
            }
        };

        let output_handle = match plan.output {
            Some(id) => Some(Arc::new(SegmentHandle::open(&self.config.data_dir, id)?)),
            None => None,
        };

        // Oldest retired segment; it holds every newer one alive
        let mut retired: Option<Arc<SegmentHandle>> = None;
        {
            let mut segments = self.segments.write();

            if let Some(handle) = output_handle {
                segments.insert(handle.id(), handle);
            }
            for (key, entry) in plan.repoints {
                self.keydir.upsert(key, entry);
            }
            for key in &plan.dropped {
                self.keydir.remove(key);
            }
            for id in sealed.iter().rev() {
                if let Some(handle) = segments.remove(id) {
                    match retired.take() {
                        Some(newer) => handle.retire_before(newer),
                        None => handle.retire(),
                    }
                    retired = Some(handle);
                }
            }
        }
        drop(retired);

        stats.output_segment = plan.output;
        stats.bytes_after = self.segments.disk_size()?;

        tracing::info!(
            merged = stats.segments_merged,
            written = stats.records_written,
            dropped = stats.tombstones_dropped,
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            "merge complete"
        );

        Ok(stats)
    }

    /// Pass 1: latest record location per key across `sealed`, in id order
    ///
    /// Holds locations only, never values.
    fn latest_locations(
        &self,
        sealed: &[SegmentId],
        stats: &mut MergeStats,
    ) -> Result<HashMap<Vec<u8>, KeydirEntry>> {
        let mut latest = HashMap::new();

        for &id in sealed {
            for scanned in SegmentScanner::open(&self.config.data_dir, id)? {
                let scanned = scanned?;
                let record = scanned.record;
                latest.insert(
                    record.key,
                    KeydirEntry {
                        segment_id: id,
                        value_offset: scanned.value_offset,
                        value_len: record.value.len() as u32,
                        timestamp: record.timestamp,
                        tombstone: record.tombstone,
                    },
                );
                stats.records_scanned += 1;
            }
        }

        Ok(latest)
    }

    /// Pass 2 plus hint: build the output segment and stage keydir changes
    fn write_output(
        &self,
        output_id: SegmentId,
        sealed: &[SegmentId],
        latest: HashMap<Vec<u8>, KeydirEntry>,
        stats: &mut MergeStats,
    ) -> Result<MergePlan> {
        let dir = &self.config.data_dir;

        // Copy in file order so reads of each source stay sequential
        let mut work: Vec<_> = latest.into_iter().collect();
        work.sort_unstable_by_key(|(_, e)| (e.segment_id, e.value_offset));

        let mut output: Option<SegmentWriter> = None;
        let mut repoints = Vec::new();
        let mut dropped = Vec::new();

        for (key, found) in work {
            let current = match self.keydir.lookup(&key) {
                Some(current) => current,
                None => {
                    stats.superseded_skipped += 1;
                    continue;
                }
            };
            if current.tombstone {
                dropped.push(key);
                continue;
            }
            if !current.same_location(&found) {
                stats.superseded_skipped += 1;
                continue;
            }

            let source = self
                .segments
                .get(found.segment_id)
                .ok_or(CaskError::MissingSegment(found.segment_id))?;
            let record = source.read_record(key.len(), found.value_offset, found.value_len)?;
            if record.key != key {
                return Err(CaskError::Corruption(format!(
                    "segment {} offset {} holds a different key",
                    found.segment_id, found.value_offset
                )));
            }
            let frame = record::encode(&record.key, &record.value, record.timestamp, false)?;

            let writer = match output.take() {
                Some(writer) => writer,
                None => SegmentWriter::create(dir, output_id)?,
            };
            let writer = output.insert(writer);
            let value_offset = writer.append(&frame)?;

            repoints.push((
                key,
                KeydirEntry {
                    segment_id: output_id,
                    value_offset,
                    value_len: found.value_len,
                    timestamp: record.timestamp,
                    tombstone: false,
                },
            ));
            stats.records_written += 1;
        }

        self.sweep_keydir(sealed, &repoints, &mut dropped)?;
        stats.tombstones_dropped = dropped.len() as u64;

        let output = match output {
            Some(writer) => {
                let id = writer.seal()?;
                let mut hint = HintWriter::create(dir, id)?;
                for (key, entry) in &repoints {
                    hint.add(key, entry)?;
                }
                hint.finish()?;
                Some(id)
            }
            None => None,
        };

        Ok(MergePlan {
            repoints,
            dropped,
            output,
        })
    }

    /// Make sure no keydir entry would be left pointing at a retired segment
    ///
    /// Tombstones still referencing merged segments join `dropped`; a live
    /// entry that was not copied means the scan and the keydir disagree.
    fn sweep_keydir(
        &self,
        sealed: &[SegmentId],
        repoints: &[(Vec<u8>, KeydirEntry)],
        dropped: &mut Vec<Vec<u8>>,
    ) -> Result<()> {
        let sealed: HashSet<SegmentId> = sealed.iter().copied().collect();
        let copied: HashSet<&[u8]> = repoints.iter().map(|(k, _)| k.as_slice()).collect();
        let already_dropped: HashSet<Vec<u8>> = dropped.iter().cloned().collect();

        for (key, entry) in self.keydir.snapshot() {
            if !sealed.contains(&entry.segment_id) {
                continue;
            }
            if entry.tombstone {
                if !already_dropped.contains(&key) {
                    dropped.push(key);
                }
            } else if !copied.contains(key.as_slice()) {
                return Err(CaskError::Corruption(format!(
                    "live key in segment {} was not found by the merge scan",
                    entry.segment_id
                )));
            }
        }

        Ok(())
    }
}

/// Remove whatever a failed merge left of its output segment
fn discard_output(engine: &Engine, id: SegmentId) {
    let dir = &engine.config.data_dir;
    for path in [hint_path(dir, id), data_path(dir, id)] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("failed to remove {}: {}", path.display(), e),
        }
    }
}
