//! Bounded per-ledger cache of recently appended entry payloads.
//!
//! The cache fills on the append path and serves the read path for
//! cursors that are close to the tail. It fails open: a miss simply
//! sends the caller to the segment store. A `max_size` of zero disables
//! caching entirely.
//!
//! Eviction is LRU by access time, tracked with a logical tick so no
//! clock reads happen on the hot path. The cache has its own internal
//! lock; it is shared by every cursor of a ledger.

use std::collections::BTreeMap;
use std::sync::Mutex;

use bytes::Bytes;

use crate::position::Position;

pub(crate) struct EntryCache {
    max_size: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    /// Payloads keyed by position.
    entries: BTreeMap<Position, CachedEntry>,
    /// Access order index: tick of last access -> position.
    by_access: BTreeMap<u64, Position>,
    /// Total payload bytes currently held.
    size: usize,
    /// Logical access counter.
    tick: u64,
}

struct CachedEntry {
    payload: Bytes,
    access: u64,
}

impl EntryCache {
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            max_size,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.max_size > 0
    }

    /// Inserts a payload, evicting least-recently-accessed entries to
    /// stay within the byte budget. Payloads larger than the whole
    /// budget are not cached.
    pub(crate) fn insert(&self, position: Position, payload: Bytes) {
        if !self.enabled() || payload.len() > self.max_size {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(old) = inner.entries.remove(&position) {
            inner.by_access.remove(&old.access);
            inner.size -= old.payload.len();
        }
        inner.tick += 1;
        let access = inner.tick;
        inner.size += payload.len();
        inner.entries.insert(position, CachedEntry { payload, access });
        inner.by_access.insert(access, position);

        while inner.size > self.max_size {
            let Some((&oldest_access, &oldest_pos)) = inner.by_access.iter().next() else {
                break;
            };
            inner.by_access.remove(&oldest_access);
            if let Some(evicted) = inner.entries.remove(&oldest_pos) {
                inner.size -= evicted.payload.len();
            }
        }
    }

    /// Looks up a payload, refreshing its access time on a hit.
    pub(crate) fn get(&self, position: Position) -> Option<Bytes> {
        if !self.enabled() {
            return None;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;
        let entry = inner.entries.get_mut(&position)?;
        let old_access = entry.access;
        entry.access = tick;
        let payload = entry.payload.clone();
        inner.by_access.remove(&old_access);
        inner.by_access.insert(tick, position);
        Some(payload)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}
