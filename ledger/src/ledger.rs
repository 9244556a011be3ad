//! The managed ledger: append path, read surface, and cursor registry.
//!
//! A [`Ledger`] is an append-only log of opaque payloads, physically
//! stored as a chain of segments in an external
//! [`SegmentStore`](common::store::SegmentStore) and logically addressed
//! by [`Position`]s. The segment list is persisted in the metadata store
//! under the ledger name so the chain survives restarts.
//!
//! The ledger owns its cursors; each [`Cursor`](crate::Cursor) holds a
//! non-owning handle to the shared [`LedgerCore`], so there is no
//! reference cycle between the two.
//!
//! # Thread Safety
//!
//! `Ledger` is designed to be shared across tasks. All methods take
//! `&self`; appends serialize on an internal write lock while reads work
//! against a snapshot of the segment list.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(InMemorySegmentStore::new());
//! let meta = Arc::new(InMemoryMetaStore::new());
//! let ledger = Ledger::open("events", LedgerConfig::default(), store, meta).await?;
//!
//! let cursor = ledger.open_cursor("consumer-a").await?;
//! ledger.append(Bytes::from("hello")).await?;
//! let entries = cursor.read_entries(10).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use common::clock::{Clock, SystemClock};
use common::store::{ExpectedVersion, MetaStore, SegmentId, SegmentStore};

use crate::cache::EntryCache;
use crate::config::LedgerConfig;
use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::model::Entry;
use crate::position::{Position, PositionBound};
use crate::serde::LedgerInfo;

/// In-memory view of one segment of the chain.
#[derive(Debug, Clone)]
pub(crate) struct SegmentState {
    pub(crate) id: SegmentId,
    pub(crate) entry_count: u64,
}

struct LedgerState {
    /// Ordered segment chain; the last segment is the open one.
    segments: Vec<SegmentState>,
    /// Version of the ledger's metadata record, for CAS updates.
    meta_version: u64,
}

/// Shared core of a ledger: everything cursors need, without the cursor
/// registry itself.
pub(crate) struct LedgerCore {
    name: String,
    config: LedgerConfig,
    store: Arc<dyn SegmentStore>,
    meta: Arc<dyn MetaStore>,
    clock: Arc<dyn Clock>,
    cache: EntryCache,
    state: RwLock<LedgerState>,
    append_tx: watch::Sender<u64>,
    closed: AtomicBool,
}

fn total_entries(segments: &[SegmentState]) -> u64 {
    segments.iter().map(|s| s.entry_count).sum()
}

/// Number of live entries strictly before `p`.
fn offset_before(segments: &[SegmentState], p: Position) -> u64 {
    let mut total = 0;
    for seg in segments {
        if seg.id < p.segment_id {
            total += seg.entry_count;
        } else if seg.id == p.segment_id {
            total += (p.entry_id.max(0) as u64).min(seg.entry_count);
            break;
        } else {
            break;
        }
    }
    total
}

/// Maps a 0-based global entry index back to a position.
fn position_at_offset(segments: &[SegmentState], mut offset: u64) -> Option<Position> {
    for seg in segments {
        if offset < seg.entry_count {
            return Some(Position::new(seg.id, offset as i64));
        }
        offset -= seg.entry_count;
    }
    None
}

/// Resolves `p` to the position of the first live entry at or after it,
/// rolling over sealed segment boundaries. `None` when no such entry
/// exists yet.
fn normalize_read_position(segments: &[SegmentState], p: Position) -> Option<Position> {
    let mut idx = segments.iter().position(|s| s.id >= p.segment_id)?;
    let mut entry = if segments[idx].id > p.segment_id {
        0
    } else {
        p.entry_id.max(0) as u64
    };
    loop {
        let seg = &segments[idx];
        if entry < seg.entry_count {
            return Some(Position::new(seg.id, entry as i64));
        }
        idx += 1;
        if idx >= segments.len() {
            return None;
        }
        entry = 0;
    }
}

impl LedgerCore {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &Arc<dyn SegmentStore> {
        &self.store
    }

    pub(crate) fn meta(&self) -> &Arc<dyn MetaStore> {
        &self.meta
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Metadata store key of a cursor's record.
    pub(crate) fn cursor_meta_key(&self, cursor: &str) -> String {
        format!("{}/{}", self.name, cursor)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn subscribe_append(&self) -> watch::Receiver<u64> {
        self.append_tx.subscribe()
    }

    async fn segments_snapshot(&self) -> Vec<SegmentState> {
        self.state.read().await.segments.clone()
    }

    /// Appends a payload, rolling to a new segment when the open one is
    /// full. Returns the assigned position.
    pub(crate) async fn append(&self, payload: Bytes) -> Result<Position> {
        if self.is_closed() {
            return Err(Error::LedgerClosed(self.name.clone()));
        }
        let mut state = self.state.write().await;

        let needs_roll = state
            .segments
            .last()
            .map_or(true, |s| s.entry_count >= self.config.max_entries_per_segment);
        if needs_roll {
            self.roll_segment(&mut state).await?;
        }

        let Some(current) = state.segments.last_mut() else {
            return Err(Error::LogWrite("ledger has no open segment".to_string()));
        };
        let entry_id = self
            .store
            .append(current.id, payload.clone())
            .await
            .map_err(|e| Error::LogWrite(e.to_string()))?;
        current.entry_count += 1;
        let position = Position::new(current.id, entry_id);
        drop(state);

        self.cache.insert(position, payload);
        self.append_tx.send_modify(|appended| *appended += 1);
        debug!(ledger = %self.name, position = %position, "appended entry");
        Ok(position)
    }

    /// Seals the open segment and starts a new one, persisting the
    /// updated chain before the in-memory state changes.
    async fn roll_segment(&self, state: &mut LedgerState) -> Result<()> {
        if let Some(last) = state.segments.last() {
            self.store
                .seal(last.id)
                .await
                .map_err(|e| Error::LogWrite(e.to_string()))?;
        }
        let new_id = self
            .store
            .create()
            .await
            .map_err(|e| Error::LogWrite(e.to_string()))?;

        let mut segments: Vec<SegmentId> = state.segments.iter().map(|s| s.id).collect();
        segments.push(new_id);
        let info = LedgerInfo { segments };
        let version = match self
            .meta
            .put(
                &self.name,
                info.serialize(),
                ExpectedVersion::Exact(state.meta_version),
            )
            .await
        {
            Ok(version) => version,
            Err(err) => {
                // The chain update lost; do not leave the fresh segment
                // behind.
                let _ = self.store.remove(new_id).await;
                return Err(err.into());
            }
        };

        state.segments.push(SegmentState {
            id: new_id,
            entry_count: 0,
        });
        state.meta_version = version;
        info!(ledger = %self.name, segment = new_id, "rolled to new segment");
        Ok(())
    }

    /// Reads up to `max` live entries starting at `from`, in order.
    ///
    /// Short-circuits at segment boundaries; the returned position is
    /// the one to continue from. Recently appended entries are served
    /// from the cache, the rest from the segment store.
    pub(crate) async fn read_entries(
        &self,
        from: Position,
        max: usize,
    ) -> Result<(Vec<Entry>, Position)> {
        let segments = self.segments_snapshot().await;
        let Some(start) = normalize_read_position(&segments, from) else {
            return Ok((Vec::new(), from));
        };
        let segment_entries = segments
            .iter()
            .find(|s| s.id == start.segment_id)
            .map_or(0, |s| s.entry_count);
        let available = segment_entries.saturating_sub(start.entry_id as u64) as usize;
        let want = max.min(available);

        let mut entries = Vec::with_capacity(want);
        let mut cur = start;
        while entries.len() < want {
            match self.cache.get(cur) {
                Some(payload) => {
                    entries.push(Entry::new(cur, payload));
                    cur = cur.next();
                }
                None => break,
            }
        }
        if entries.len() < want {
            let remaining = want - entries.len();
            let read = self
                .store
                .read(cur.segment_id, cur.entry_id, remaining)
                .await
                .map_err(|e| Error::LogRead(e.to_string()))?;
            for (entry_id, payload) in read {
                entries.push(Entry::new(Position::new(cur.segment_id, entry_id), payload));
            }
        }

        let next = entries.last().map_or(start, |e| e.position.next());
        Ok((entries, next))
    }

    /// Reads the single entry at `p`. Fails when no entry exists there.
    pub(crate) async fn read_entry(&self, p: Position) -> Result<Entry> {
        if p.is_before_first() {
            return Err(Error::InvalidArgument(format!(
                "position {} does not address an entry",
                p
            )));
        }
        if let Some(payload) = self.cache.get(p) {
            return Ok(Entry::new(p, payload));
        }
        let read = self
            .store
            .read(p.segment_id, p.entry_id, 1)
            .await
            .map_err(|e| Error::LogRead(e.to_string()))?;
        match read.into_iter().next() {
            Some((entry_id, payload)) if entry_id == p.entry_id => {
                Ok(Entry::new(p, payload))
            }
            _ => Err(Error::LogRead(format!("no entry at position {}", p))),
        }
    }

    /// True when a live entry exists at or after `p`.
    pub(crate) async fn has_more_after(&self, p: Position) -> bool {
        self.entries_count_from(p, PositionBound::StartIncluded).await > 0
    }

    /// Number of live entries at or after `p` (`StartIncluded`) or
    /// strictly after `p` (`StartExcluded`).
    pub(crate) async fn entries_count_from(&self, p: Position, bound: PositionBound) -> u64 {
        let segments = self.segments_snapshot().await;
        let q = match bound {
            PositionBound::StartIncluded => p,
            PositionBound::StartExcluded => p.next(),
        };
        total_entries(&segments) - offset_before(&segments, q)
    }

    /// The position `n` live entries after `start`, clamped to the last
    /// live position. With `StartIncluded` the start itself counts as the
    /// first of the `n`.
    pub(crate) async fn position_after_n(
        &self,
        start: Position,
        n: u64,
        bound: PositionBound,
    ) -> Position {
        let segments = self.segments_snapshot().await;
        let total = total_entries(&segments);
        if total == 0 || n == 0 {
            return start;
        }
        let base = match bound {
            PositionBound::StartExcluded => offset_before(&segments, start.next()),
            PositionBound::StartIncluded => offset_before(&segments, start),
        };
        let index = (base + n - 1).min(total - 1);
        position_at_offset(&segments, index).unwrap_or(start)
    }

    /// The `k`-th live entry position at or after `p` (1-based), or
    /// `None` when fewer than `k` remain.
    pub(crate) async fn nth_live_at_or_after(&self, p: Position, k: u64) -> Option<Position> {
        if k == 0 {
            return None;
        }
        let segments = self.segments_snapshot().await;
        let index = offset_before(&segments, p) + (k - 1);
        if index >= total_entries(&segments) {
            return None;
        }
        position_at_offset(&segments, index)
    }

    /// The first live entry position strictly after `p`.
    pub(crate) async fn next_live_position(&self, p: Position) -> Option<Position> {
        self.nth_live_at_or_after(p.next(), 1).await
    }

    /// The earliest live entry position, if any entry exists.
    pub(crate) async fn first_live_position(&self) -> Option<Position> {
        let segments = self.segments_snapshot().await;
        position_at_offset(&segments, 0)
    }

    /// The position of the newest entry, or `(open_segment, -1)` when
    /// the open segment is still empty.
    pub(crate) async fn last_position(&self) -> Position {
        let segments = self.segments_snapshot().await;
        match segments.last() {
            Some(seg) => Position::new(seg.id, seg.entry_count as i64 - 1),
            None => Position::before_segment(0),
        }
    }

    /// The position right before `p` in log order, crossing segment
    /// boundaries; `(segment, -1)` when nothing precedes `p`.
    pub(crate) async fn previous_position(&self, p: Position) -> Position {
        if p.entry_id > 0 {
            return Position::new(p.segment_id, p.entry_id - 1);
        }
        let segments = self.segments_snapshot().await;
        let predecessor = segments
            .iter()
            .rev()
            .find(|s| s.id < p.segment_id && s.entry_count > 0);
        match predecessor {
            Some(seg) => Position::new(seg.id, seg.entry_count as i64 - 1),
            None => Position::before_segment(p.segment_id),
        }
    }
}

/// The main ledger interface: appends, the read surface, and the cursor
/// registry.
pub struct Ledger {
    core: Arc<LedgerCore>,
    cursors: RwLock<BTreeMap<String, Arc<Cursor>>>,
}

impl Ledger {
    /// Opens or creates a ledger with the given configuration.
    ///
    /// Recovers the segment chain from the metadata store; on first open
    /// a fresh chain with one empty segment is created.
    ///
    /// # Errors
    ///
    /// Fails when the metadata record cannot be read or decoded, or when
    /// the segment store rejects recovery of the chain.
    pub async fn open(
        name: impl Into<String>,
        config: LedgerConfig,
        store: Arc<dyn SegmentStore>,
        meta: Arc<dyn MetaStore>,
    ) -> Result<Self> {
        Self::open_with_clock(name, config, store, meta, Arc::new(SystemClock)).await
    }

    /// Opens a ledger with an explicit clock, for tests that control
    /// time.
    pub async fn open_with_clock(
        name: impl Into<String>,
        config: LedgerConfig,
        store: Arc<dyn SegmentStore>,
        meta: Arc<dyn MetaStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let name = name.into();
        let (segments, meta_version) = match meta.get(&name).await.map_err(Error::from)? {
            Some(record) => {
                let info = LedgerInfo::deserialize(&record.value)?;
                let mut segments = Vec::with_capacity(info.segments.len());
                for id in info.segments {
                    let last = store
                        .last_entry(id)
                        .await
                        .map_err(|e| Error::LogRead(e.to_string()))?;
                    segments.push(SegmentState {
                        id,
                        entry_count: (last + 1) as u64,
                    });
                }
                info!(ledger = %name, segments = segments.len(), "recovered ledger");
                (segments, record.version)
            }
            None => {
                let id = store
                    .create()
                    .await
                    .map_err(|e| Error::LogWrite(e.to_string()))?;
                let info = LedgerInfo { segments: vec![id] };
                let version = meta
                    .put(&name, info.serialize(), ExpectedVersion::Absent)
                    .await
                    .map_err(Error::from)?;
                info!(ledger = %name, segment = id, "created ledger");
                (
                    vec![SegmentState {
                        id,
                        entry_count: 0,
                    }],
                    version,
                )
            }
        };

        let cache = EntryCache::new(config.max_cache_size);
        let (append_tx, _) = watch::channel(0u64);
        let core = Arc::new(LedgerCore {
            name,
            config,
            store,
            meta,
            clock,
            cache,
            state: RwLock::new(LedgerState {
                segments,
                meta_version,
            }),
            append_tx,
            closed: AtomicBool::new(false),
        });
        Ok(Self {
            core,
            cursors: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn config(&self) -> &LedgerConfig {
        self.core.config()
    }

    /// Appends an opaque payload and returns its assigned position.
    pub async fn append(&self, payload: Bytes) -> Result<Position> {
        self.core.append(payload).await
    }

    /// Reads up to `max` entries starting at `from`; see
    /// [`LedgerCore::read_entries`] semantics: may short-circuit at a
    /// segment boundary, returns the position to continue from.
    pub async fn read_entries(&self, from: Position, max: usize) -> Result<(Vec<Entry>, Position)> {
        self.core.read_entries(from, max).await
    }

    /// Reads the single entry at `p`.
    pub async fn read_entry(&self, p: Position) -> Result<Entry> {
        self.core.read_entry(p).await
    }

    /// True when a live entry exists at or after `p`.
    pub async fn has_more_after(&self, p: Position) -> bool {
        self.core.has_more_after(p).await
    }

    /// The position `n` live entries after `start`, clamped to the last
    /// live position.
    pub async fn position_after_n(&self, start: Position, n: u64, bound: PositionBound) -> Position {
        self.core.position_after_n(start, n, bound).await
    }

    /// Number of live entries from `p` under the given bound.
    pub async fn total_entries_from(&self, p: Position, bound: PositionBound) -> u64 {
        self.core.entries_count_from(p, bound).await
    }

    /// The position of the newest entry, or the before-first position of
    /// the open segment when it is empty.
    pub async fn last_position(&self) -> Position {
        self.core.last_position().await
    }

    /// A watch channel bumped on every successful append. Subscribers
    /// re-check their read position when it changes.
    pub fn subscribe_append(&self) -> watch::Receiver<u64> {
        self.core.subscribe_append()
    }

    /// Opens a cursor, recovering durable state when the cursor is known
    /// or initializing it at the end of the log when it is not.
    pub async fn open_cursor(&self, name: &str) -> Result<Arc<Cursor>> {
        if self.core.is_closed() {
            return Err(Error::LedgerClosed(self.core.name().to_string()));
        }
        if let Some(cursor) = self.cursors.read().await.get(name) {
            return Ok(Arc::clone(cursor));
        }
        let mut cursors = self.cursors.write().await;
        if let Some(cursor) = cursors.get(name) {
            return Ok(Arc::clone(cursor));
        }
        let cursor = Cursor::recover_or_create(name, Arc::clone(&self.core)).await?;
        let cursor = Arc::new(cursor);
        cursors.insert(name.to_string(), Arc::clone(&cursor));
        Ok(cursor)
    }

    /// Returns an already open cursor.
    pub async fn cursor(&self, name: &str) -> Option<Arc<Cursor>> {
        self.cursors.read().await.get(name).cloned()
    }

    /// Deletes a cursor and all of its durable state, including any
    /// dedicated cursor ledger.
    pub async fn delete_cursor(&self, name: &str) -> Result<()> {
        let cursor = self.cursors.write().await.remove(name);
        match cursor {
            Some(cursor) => cursor.delete_cursor().await,
            None => {
                crate::persist::delete_cursor_state(&self.core, name).await
            }
        }
    }

    /// Closes the ledger: every open cursor flushes its latest snapshot,
    /// then appends and cursor opens are rejected. Cursor state is
    /// preserved for the next open.
    pub async fn close(&self) -> Result<()> {
        self.core.set_closed();
        let cursors: Vec<Arc<Cursor>> = self.cursors.read().await.values().cloned().collect();
        let mut first_error = None;
        for cursor in cursors {
            if let Err(err) = cursor.close().await {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use common::store::{InMemoryMetaStore, InMemorySegmentStore};

    use super::*;

    async fn open_ledger(config: LedgerConfig) -> Ledger {
        let store = Arc::new(InMemorySegmentStore::new());
        let meta = Arc::new(InMemoryMetaStore::new());
        Ledger::open("test", config, store, meta).await.unwrap()
    }

    fn small_segments() -> LedgerConfig {
        LedgerConfig {
            max_entries_per_segment: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn should_assign_increasing_positions() {
        // given
        let ledger = open_ledger(LedgerConfig::default()).await;

        // when
        let p0 = ledger.append(Bytes::from("a")).await.unwrap();
        let p1 = ledger.append(Bytes::from("b")).await.unwrap();

        // then
        assert!(p0 < p1);
        assert_eq!(p0.segment_id, p1.segment_id);
        assert_eq!(p1.entry_id, p0.entry_id + 1);
    }

    #[tokio::test]
    async fn should_roll_segments_at_configured_size() {
        // given
        let ledger = open_ledger(small_segments()).await;

        // when - three entries with two per segment
        let p0 = ledger.append(Bytes::from("a")).await.unwrap();
        let p1 = ledger.append(Bytes::from("b")).await.unwrap();
        let p2 = ledger.append(Bytes::from("c")).await.unwrap();

        // then
        assert_eq!(p0.segment_id, p1.segment_id);
        assert_ne!(p1.segment_id, p2.segment_id);
        assert_eq!(p2.entry_id, 0);
    }

    #[tokio::test]
    async fn should_read_entries_across_segment_boundary() {
        // given
        let ledger = open_ledger(small_segments()).await;
        for i in 0..5 {
            ledger
                .append(Bytes::from(format!("value-{}", i)))
                .await
                .unwrap();
        }

        // when - walk the log from the very beginning
        let mut collected = Vec::new();
        let mut pos = Position::before_segment(0);
        loop {
            let (entries, next) = ledger.read_entries(pos, 10).await.unwrap();
            if entries.is_empty() {
                break;
            }
            collected.extend(entries);
            pos = next;
        }

        // then
        assert_eq!(collected.len(), 5);
        for (i, entry) in collected.iter().enumerate() {
            assert_eq!(entry.payload, Bytes::from(format!("value-{}", i)));
        }
    }

    #[tokio::test]
    async fn should_read_entries_with_cache_disabled() {
        // given
        let ledger = open_ledger(LedgerConfig {
            max_cache_size: 0,
            max_entries_per_segment: 2,
            ..Default::default()
        })
        .await;
        for i in 0..4 {
            ledger
                .append(Bytes::from(format!("value-{}", i)))
                .await
                .unwrap();
        }

        // when
        let (entries, _) = ledger.read_entries(Position::new(0, 0), 10).await.unwrap();

        // then - short-circuits at the segment boundary
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload, Bytes::from("value-0"));
    }

    #[tokio::test]
    async fn should_return_empty_read_on_empty_ledger() {
        // given
        let ledger = open_ledger(LedgerConfig::default()).await;

        // when
        let from = Position::before_segment(0);
        let (entries, next) = ledger.read_entries(from, 10).await.unwrap();

        // then
        assert!(entries.is_empty());
        assert_eq!(next, from);
    }

    #[tokio::test]
    async fn should_read_single_entry_by_position() {
        // given
        let ledger = open_ledger(LedgerConfig::default()).await;
        let pos = ledger.append(Bytes::from("hello")).await.unwrap();

        // when
        let entry = ledger.read_entry(pos).await.unwrap();

        // then
        assert_eq!(entry.position, pos);
        assert_eq!(entry.payload, Bytes::from("hello"));
    }

    #[tokio::test]
    async fn should_fail_reading_nonexistent_entry() {
        // given
        let ledger = open_ledger(LedgerConfig::default()).await;
        ledger.append(Bytes::from("only")).await.unwrap();

        // when
        let result = ledger.read_entry(Position::new(100, 100)).await;

        // then
        assert!(matches!(result, Err(Error::LogRead(_))));
    }

    #[tokio::test]
    async fn should_count_entries_from_position() {
        // given
        let ledger = open_ledger(small_segments()).await;
        let positions: Vec<Position> = {
            let mut out = Vec::new();
            for i in 0..5 {
                out.push(ledger.append(Bytes::from(format!("v{}", i))).await.unwrap());
            }
            out
        };

        // when/then
        assert_eq!(
            ledger
                .total_entries_from(positions[0], PositionBound::StartIncluded)
                .await,
            5
        );
        assert_eq!(
            ledger
                .total_entries_from(positions[0], PositionBound::StartExcluded)
                .await,
            4
        );
        assert_eq!(
            ledger
                .total_entries_from(positions[4], PositionBound::StartExcluded)
                .await,
            0
        );
        assert_eq!(
            ledger
                .total_entries_from(Position::before_segment(0), PositionBound::StartIncluded)
                .await,
            5
        );
    }

    #[tokio::test]
    async fn should_compute_position_after_n_across_segments() {
        // given
        let ledger = open_ledger(small_segments()).await;
        let mut positions = Vec::new();
        for i in 0..5 {
            positions.push(ledger.append(Bytes::from(format!("v{}", i))).await.unwrap());
        }

        // when/then - excluded bound walks n entries forward
        assert_eq!(
            ledger
                .position_after_n(positions[0], 1, PositionBound::StartExcluded)
                .await,
            positions[1]
        );
        assert_eq!(
            ledger
                .position_after_n(positions[0], 4, PositionBound::StartExcluded)
                .await,
            positions[4]
        );
        // clamped at the last live position
        assert_eq!(
            ledger
                .position_after_n(positions[0], 100, PositionBound::StartExcluded)
                .await,
            positions[4]
        );
        // included bound counts the start itself
        assert_eq!(
            ledger
                .position_after_n(positions[2], 1, PositionBound::StartIncluded)
                .await,
            positions[2]
        );
    }

    #[tokio::test]
    async fn should_report_last_position_of_empty_ledger_as_before_first() {
        // given
        let ledger = open_ledger(LedgerConfig::default()).await;

        // when
        let last = ledger.last_position().await;

        // then
        assert!(last.is_before_first());
    }

    #[tokio::test]
    async fn should_walk_previous_position_across_segments() {
        // given
        let ledger = open_ledger(small_segments()).await;
        let mut positions = Vec::new();
        for i in 0..3 {
            positions.push(ledger.append(Bytes::from(format!("v{}", i))).await.unwrap());
        }

        // when/then - positions[2] opens segment 1
        assert_eq!(
            ledger.core.previous_position(positions[2]).await,
            positions[1]
        );
        assert_eq!(
            ledger.core.previous_position(positions[1]).await,
            positions[0]
        );
        assert_eq!(
            ledger.core.previous_position(positions[0]).await,
            Position::before_segment(positions[0].segment_id)
        );
    }

    #[tokio::test]
    async fn should_recover_segment_chain_on_reopen() {
        // given
        let store = Arc::new(InMemorySegmentStore::new());
        let meta = Arc::new(InMemoryMetaStore::new());
        let config = LedgerConfig {
            max_entries_per_segment: 2,
            ..Default::default()
        };
        {
            let ledger = Ledger::open("events", config.clone(), store.clone(), meta.clone())
                .await
                .unwrap();
            for i in 0..5 {
                ledger
                    .append(Bytes::from(format!("value-{}", i)))
                    .await
                    .unwrap();
            }
            ledger.close().await.unwrap();
        }

        // when
        let reopened = Ledger::open("events", config, store, meta).await.unwrap();

        // then - counts recovered, appends continue after the old tail
        assert_eq!(
            reopened
                .total_entries_from(Position::before_segment(0), PositionBound::StartIncluded)
                .await,
            5
        );
        let next = reopened.append(Bytes::from("value-5")).await.unwrap();
        let last = reopened.last_position().await;
        assert_eq!(next, last);
        assert!(next > Position::new(0, 0));
    }

    #[tokio::test]
    async fn should_reject_appends_after_close() {
        // given
        let ledger = open_ledger(LedgerConfig::default()).await;
        ledger.close().await.unwrap();

        // when
        let result = ledger.append(Bytes::from("late")).await;

        // then
        assert!(matches!(result, Err(Error::LedgerClosed(_))));
    }

    #[tokio::test]
    async fn should_notify_append_subscribers() {
        // given
        let ledger = open_ledger(LedgerConfig::default()).await;
        let mut rx = ledger.subscribe_append();

        // when
        ledger.append(Bytes::from("x")).await.unwrap();

        // then
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
