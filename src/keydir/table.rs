//! Keydir implementation
//!
//! HashMap-based index with RwLock for concurrency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::KeydirEntry;

/// In-memory key directory
///
/// ## Concurrency:
/// - `entries`: RwLock (many concurrent readers, exclusive writer)
/// - `tombstones`: atomic counter kept in step with `entries`
pub struct Keydir {
    entries: RwLock<HashMap<Vec<u8>, KeydirEntry>>,
    tombstones: AtomicUsize,
}

impl Keydir {
    /// Create a new empty keydir
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            tombstones: AtomicUsize::new(0),
        }
    }

    /// Current entry for `key`, tombstoned or not
    pub fn lookup(&self, key: &[u8]) -> Option<KeydirEntry> {
        self.entries.read().get(key).copied()
    }

    /// Replace whatever entry `key` has
    ///
    /// Returns the previous entry. Ordering is the caller's job: writes
    /// reach the keydir in append order.
    pub fn upsert(&self, key: Vec<u8>, entry: KeydirEntry) -> Option<KeydirEntry> {
        let mut entries = self.entries.write();
        let previous = entries.insert(key, entry);
        self.track(previous.as_ref(), Some(&entry));
        previous
    }

    /// Remove `key`, returning its entry
    pub fn remove(&self, key: &[u8]) -> Option<KeydirEntry> {
        let mut entries = self.entries.write();
        let previous = entries.remove(key);
        self.track(previous.as_ref(), None);
        previous
    }

    /// Lazy iterator over the keys present right now
    ///
    /// The key set is captured at call time; mutations made while iterating
    /// are not observed.
    pub fn keys(&self) -> KeydirKeys {
        let keys: Vec<Vec<u8>> = self.entries.read().keys().cloned().collect();
        KeydirKeys {
            inner: keys.into_iter(),
        }
    }

    /// Copy of every (key, entry) pair
    pub fn snapshot(&self) -> Vec<(Vec<u8>, KeydirEntry)> {
        self.entries
            .read()
            .iter()
            .map(|(k, e)| (k.clone(), *e))
            .collect()
    }

    /// Live keys, tombstones excluded, sorted lexicographically
    pub fn live_keys(&self) -> Vec<Vec<u8>> {
        let mut keys: Vec<Vec<u8>> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| !e.tombstone)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Newest timestamp held by any entry (0 when empty)
    pub fn max_timestamp(&self) -> u64 {
        self.entries
            .read()
            .values()
            .map(|e| e.timestamp)
            .max()
            .unwrap_or(0)
    }

    /// Number of entries, tombstones included
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.load(Ordering::Relaxed)
    }

    /// Number of keys that currently have a value
    pub fn live_len(&self) -> usize {
        self.len().saturating_sub(self.tombstone_count())
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        self.tombstones.store(0, Ordering::Relaxed);
    }

    fn track(&self, removed: Option<&KeydirEntry>, added: Option<&KeydirEntry>) {
        if removed.is_some_and(|e| e.tombstone) {
            self.tombstones.fetch_sub(1, Ordering::Relaxed);
        }
        if added.is_some_and(|e| e.tombstone) {
            self.tombstones.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for Keydir {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`Keydir::keys`]
pub struct KeydirKeys {
    inner: std::vec::IntoIter<Vec<u8>>,
}

impl Iterator for KeydirKeys {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for KeydirKeys {}
