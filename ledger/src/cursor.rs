//! The managed cursor: a durable per-consumer pointer with ack state.
//!
//! A cursor tracks three things over its ledger:
//!
//! - `read_pos`: the position of the next entry to hand out,
//! - `mark_delete_pos`: the greatest position at or below which every
//!   entry is acknowledged,
//! - the individually-deleted set: acknowledgments above the mark-delete
//!   point, kept as coalesced ranges.
//!
//! Invariants maintained across every operation:
//!
//! 1. `mark_delete_pos` is always below `read_pos`.
//! 2. Every individually-deleted range lies strictly above the first
//!    unacknowledged entry.
//! 3. When acknowledgments become contiguous with the mark-delete point,
//!    they are absorbed into it and the ranges are dropped.
//!
//! All state mutations happen under the cursor's own async mutex; the
//! mutex is FIFO so operations on one cursor are serialized in arrival
//! order. Persistence I/O runs outside the state lock on a snapshot
//! captured at the moment the operation completed in memory.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};

use common::store::SegmentId;

use crate::error::{Error, Result};
use crate::find::FindNewestSearch;
use crate::ledger::LedgerCore;
use crate::model::{DeletedEntriesPolicy, Entry, SearchScope};
use crate::persist::{CursorPersistence, CursorSnapshot};
use crate::position::{Position, PositionBound};
use crate::rangeset::PositionRangeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorStatus {
    Active,
    Closed,
    Deleted,
}

struct PendingRead {
    cancel: oneshot::Sender<()>,
}

struct CursorState {
    read_pos: Position,
    mark_delete_pos: Position,
    individually_deleted: PositionRangeSet,
    pending_read: Option<PendingRead>,
    status: CursorStatus,
}

/// A durable consumer pointer over a [`Ledger`](crate::Ledger).
///
/// Obtained via [`Ledger::open_cursor`](crate::Ledger::open_cursor).
/// Cursors on the same ledger are independent; the acknowledgment state
/// of one never affects another.
pub struct Cursor {
    name: String,
    ledger: Arc<LedgerCore>,
    state: Mutex<CursorState>,
    persistence: Arc<CursorPersistence>,
}

impl Cursor {
    /// Recovers the cursor from its durable snapshot, or initializes it
    /// at the current end of the log when it is unknown.
    pub(crate) async fn recover_or_create(name: &str, ledger: Arc<LedgerCore>) -> Result<Cursor> {
        let persistence = Arc::new(CursorPersistence::new(&ledger, name));
        let recovered = persistence.recover().await?;
        let fresh = recovered.is_none();
        let (mark_delete, ranges) = match recovered {
            Some(rec) => (rec.mark_delete, rec.individually_deleted),
            None => (ledger.last_position().await, Vec::new()),
        };

        let mut individually_deleted = PositionRangeSet::new();
        for (lo, hi) in ranges {
            individually_deleted.insert_interval(lo, hi);
        }

        let cursor = Cursor {
            name: name.to_string(),
            ledger,
            state: Mutex::new(CursorState {
                read_pos: mark_delete.next(),
                mark_delete_pos: mark_delete,
                individually_deleted,
                pending_read: None,
                status: CursorStatus::Active,
            }),
            persistence,
        };

        if fresh {
            // Make the cursor durable right away: a crash between open
            // and the first ack must not re-initialize it at a newer
            // position.
            let snapshot = {
                let state = cursor.state.lock().await;
                cursor.snapshot(&state)
            };
            cursor.persistence.flush_with(snapshot).await?;
            info!(cursor = name, mark_delete = %mark_delete, "initialized cursor");
        } else {
            info!(cursor = name, mark_delete = %mark_delete, "recovered cursor");
        }
        Ok(cursor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_active(&self, state: &CursorState) -> Result<()> {
        match state.status {
            CursorStatus::Active => Ok(()),
            _ => Err(Error::CursorAlreadyClosed(self.name.clone())),
        }
    }

    fn snapshot(&self, state: &CursorState) -> CursorSnapshot {
        CursorSnapshot {
            mark_delete: state.mark_delete_pos,
            individually_deleted: state.individually_deleted.iter().collect(),
            last_active: self.ledger.clock().now_millis(),
        }
    }

    /// Reads up to `max` entries starting at the read position,
    /// advancing it past everything returned. Individually acknowledged
    /// entries are skipped and do not count against `max`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `max` is zero.
    pub async fn read_entries(&self, max: usize) -> Result<Vec<Entry>> {
        if max == 0 {
            return Err(Error::InvalidArgument(
                "read_entries requires max >= 1".to_string(),
            ));
        }
        let mut state = self.state.lock().await;
        self.ensure_active(&state)?;
        self.read_locked(&mut state, max).await
    }

    async fn read_locked(&self, state: &mut CursorState, max: usize) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        loop {
            let remaining = max - out.len();
            let (batch, next) = self.ledger.read_entries(state.read_pos, remaining).await?;
            if batch.is_empty() {
                break;
            }
            state.read_pos = next;
            for entry in batch {
                if !state.individually_deleted.contains(entry.position) {
                    out.push(entry);
                }
            }
            if out.len() >= max {
                break;
            }
        }
        Ok(out)
    }

    /// Like [`read_entries`](Cursor::read_entries), but when nothing is
    /// readable the call registers a pending read and waits for an
    /// append at the read position.
    ///
    /// At most one pending read may exist per cursor; a second
    /// concurrent call fails with [`Error::PendingReadExists`]. A
    /// waiting call completes with [`Error::ReadCanceled`] when
    /// [`cancel_pending_read`](Cursor::cancel_pending_read) removes it.
    pub async fn read_entries_or_wait(&self, max: usize) -> Result<Vec<Entry>> {
        if max == 0 {
            return Err(Error::InvalidArgument(
                "read_entries requires max >= 1".to_string(),
            ));
        }
        // Subscribe before checking availability so an append landing
        // between the check and the wait still wakes us.
        let mut appended = self.ledger.subscribe_append();
        let mut cancel_rx = {
            let mut state = self.state.lock().await;
            self.ensure_active(&state)?;
            if self.ledger.has_more_after(state.read_pos).await {
                return self.read_locked(&mut state, max).await;
            }
            if state.pending_read.is_some() {
                return Err(Error::PendingReadExists);
            }
            let (cancel_tx, cancel_rx) = oneshot::channel();
            state.pending_read = Some(PendingRead { cancel: cancel_tx });
            cancel_rx
        };

        loop {
            tokio::select! {
                _ = &mut cancel_rx => return Err(Error::ReadCanceled),
                changed = appended.changed() => {
                    if changed.is_err() {
                        let mut state = self.state.lock().await;
                        state.pending_read = None;
                        return Err(Error::LedgerClosed(self.ledger.name().to_string()));
                    }
                    let mut state = self.state.lock().await;
                    if state.pending_read.is_none() {
                        // canceled while the wakeup was in flight
                        return Err(Error::ReadCanceled);
                    }
                    if self.ledger.has_more_after(state.read_pos).await {
                        state.pending_read = None;
                        return self.read_locked(&mut state, max).await;
                    }
                }
            }
        }
    }

    /// Removes the pending read, if one exists, without completing it
    /// with entries. Returns whether a pending read was present.
    pub async fn cancel_pending_read(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.pending_read.take() {
            Some(pending) => {
                let _ = pending.cancel.send(());
                true
            }
            None => false,
        }
    }

    /// Acknowledges every entry at or below `position`.
    ///
    /// Acks are monotonic: a position below the current mark-delete
    /// fails with [`Error::InvalidMarkDelete`] and leaves the state
    /// unchanged. Re-marking the current position is a no-op. The read
    /// position is pushed forward when the new mark-delete overtakes it.
    pub async fn mark_delete(&self, position: Position) -> Result<()> {
        let snapshot = {
            let mut state = self.state.lock().await;
            self.ensure_active(&state)?;
            if position < state.mark_delete_pos {
                return Err(Error::InvalidMarkDelete(format!(
                    "mark-delete at {} is below the current {}",
                    position, state.mark_delete_pos
                )));
            }
            if position == state.mark_delete_pos {
                return Ok(());
            }
            self.apply_mark_delete(&mut state, position).await;
            debug!(cursor = %self.name, mark_delete = %state.mark_delete_pos, "mark-delete advanced");
            self.snapshot(&state)
        };
        CursorPersistence::schedule(&self.persistence, snapshot).await
    }

    async fn apply_mark_delete(&self, state: &mut CursorState, position: Position) {
        state.mark_delete_pos = position;
        state.individually_deleted.remove_below(position.next());
        self.absorb_acknowledged(state).await;
        if state.read_pos <= state.mark_delete_pos {
            state.read_pos = state.mark_delete_pos.next();
        }
    }

    /// Folds individually-deleted ranges that became contiguous with the
    /// mark-delete point into it, repeatedly, including across segment
    /// boundaries.
    async fn absorb_acknowledged(&self, state: &mut CursorState) {
        loop {
            let Some((lo, hi)) = state.individually_deleted.lowest() else {
                return;
            };
            match self.ledger.next_live_position(state.mark_delete_pos).await {
                Some(next) if next == lo => {
                    state.mark_delete_pos = Position::new(hi.segment_id, hi.entry_id - 1);
                    state.individually_deleted.remove_below(hi);
                }
                _ => return,
            }
        }
    }

    /// Acknowledges a single position. Positions at or below the
    /// mark-delete point are silently accepted (already acknowledged),
    /// as are repeated deletes of the same position.
    pub async fn delete(&self, position: Position) -> Result<()> {
        let snapshot = {
            let mut state = self.state.lock().await;
            self.ensure_active(&state)?;
            if position.is_before_first() || position <= state.mark_delete_pos {
                return Ok(());
            }
            if !state.individually_deleted.insert(position) {
                return Ok(());
            }
            self.absorb_acknowledged(&mut state).await;
            if state.read_pos <= state.mark_delete_pos {
                state.read_pos = state.mark_delete_pos.next();
            }
            self.snapshot(&state)
        };
        CursorPersistence::schedule(&self.persistence, snapshot).await
    }

    /// Moves the read position to `position` without touching the
    /// acknowledgment state. Seeking below the first unacknowledged
    /// entry fails.
    pub async fn seek(&self, position: Position) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_active(&state)?;
        if position < state.mark_delete_pos.next() {
            return Err(Error::InvalidArgument(format!(
                "seek to {} is below the first unacknowledged entry",
                position
            )));
        }
        state.read_pos = position;
        Ok(())
    }

    /// Moves the read position back to the first unacknowledged entry.
    pub async fn rewind(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_active(&state)?;
        state.read_pos = state.mark_delete_pos.next();
        Ok(())
    }

    /// Moves the cursor to `position`: it becomes the next entry to
    /// read, and everything before it is considered acknowledged.
    /// Individually-deleted state below the new point is dropped. The
    /// new state is persisted before this call returns.
    pub async fn reset_cursor(&self, position: Position) -> Result<()> {
        let snapshot = {
            let mut state = self.state.lock().await;
            self.ensure_active(&state)?;
            let mark = self.ledger.previous_position(position).await;
            state.mark_delete_pos = mark;
            state.read_pos = position;
            state.individually_deleted.remove_below(position);
            info!(cursor = %self.name, position = %position, "cursor reset");
            self.snapshot(&state)
        };
        self.persistence.flush_with(snapshot).await
    }

    /// Acknowledges the whole backlog: everything appended so far is
    /// marked deleted and the read position moves past it.
    pub async fn clear_backlog(&self) -> Result<()> {
        let last = self.ledger.last_position().await;
        let snapshot = {
            let mut state = self.state.lock().await;
            self.ensure_active(&state)?;
            if last <= state.mark_delete_pos {
                return Ok(());
            }
            self.apply_mark_delete(&mut state, last).await;
            self.snapshot(&state)
        };
        CursorPersistence::schedule(&self.persistence, snapshot).await
    }

    /// Advances the read position by `n` entries, acknowledging the
    /// entries skipped over. With [`DeletedEntriesPolicy::Include`]
    /// already-acknowledged positions count toward `n`; with
    /// [`DeletedEntriesPolicy::Exclude`] they are passed over without
    /// counting. Skipping clamps at the end of the log.
    pub async fn skip_entries(&self, n: u64, policy: DeletedEntriesPolicy) -> Result<()> {
        if n == 0 {
            return Err(Error::InvalidArgument(
                "skip_entries requires n >= 1".to_string(),
            ));
        }
        let snapshot = {
            let mut state = self.state.lock().await;
            self.ensure_active(&state)?;

            let mut counted = 0u64;
            let mut last_consumed: Option<Position> = None;
            let mut probe = state.read_pos;
            while counted < n {
                let Some(pos) = self.ledger.nth_live_at_or_after(probe, 1).await else {
                    break;
                };
                let deleted = state.individually_deleted.contains(pos);
                last_consumed = Some(pos);
                if policy == DeletedEntriesPolicy::Include || !deleted {
                    counted += 1;
                }
                probe = pos.next();
            }

            let Some(last) = last_consumed else {
                return Ok(());
            };
            if last > state.mark_delete_pos {
                self.apply_mark_delete(&mut state, last).await;
            }
            if state.read_pos <= last {
                state.read_pos = last.next();
            }
            self.snapshot(&state)
        };
        CursorPersistence::schedule(&self.persistence, snapshot).await
    }

    /// Returns the `n`-th entry (1-based) at or after the read position
    /// without touching any cursor state. With
    /// [`DeletedEntriesPolicy::Exclude`], individually acknowledged
    /// positions are transparent and do not count. `None` when fewer
    /// than `n` qualifying entries remain.
    pub async fn get_nth_entry(
        &self,
        n: u64,
        policy: DeletedEntriesPolicy,
    ) -> Result<Option<Entry>> {
        if n == 0 {
            return Err(Error::InvalidArgument(
                "get_nth_entry requires n >= 1".to_string(),
            ));
        }
        let target = {
            let state = self.state.lock().await;
            self.ensure_active(&state)?;
            let mut remaining = n;
            let mut probe = state.read_pos;
            let mut found = None;
            loop {
                let Some(pos) = self.ledger.nth_live_at_or_after(probe, 1).await else {
                    break;
                };
                let qualifies = policy == DeletedEntriesPolicy::Include
                    || !state.individually_deleted.contains(pos);
                if qualifies {
                    remaining -= 1;
                    if remaining == 0 {
                        found = Some(pos);
                        break;
                    }
                }
                probe = pos.next();
            }
            found
        };
        match target {
            Some(pos) => Ok(Some(self.ledger.read_entry(pos).await?)),
            None => Ok(None),
        }
    }

    /// Reads the given positions and returns their entries in ascending
    /// position order. Positions already at or below the mark-delete
    /// point are silently skipped; a position unknown to the log fails
    /// the whole call.
    pub async fn replay_entries(&self, positions: &BTreeSet<Position>) -> Result<Vec<Entry>> {
        let mark_delete = {
            let state = self.state.lock().await;
            self.ensure_active(&state)?;
            state.mark_delete_pos
        };
        let mut out = Vec::new();
        for &position in positions {
            if position <= mark_delete {
                continue;
            }
            out.push(self.ledger.read_entry(position).await?);
        }
        Ok(out)
    }

    /// Number of entries still readable from the read position,
    /// excluding individually acknowledged ones.
    pub async fn number_of_entries(&self) -> Result<u64> {
        let state = self.state.lock().await;
        self.ensure_active(&state)?;
        let live = self
            .ledger
            .entries_count_from(state.read_pos, PositionBound::StartIncluded)
            .await;
        Ok(live.saturating_sub(state.individually_deleted.count_from(state.read_pos)))
    }

    /// Number of unacknowledged entries: everything above the
    /// mark-delete point minus the individually acknowledged ones.
    pub async fn number_of_entries_in_backlog(&self) -> Result<u64> {
        let state = self.state.lock().await;
        self.ensure_active(&state)?;
        let live = self
            .ledger
            .entries_count_from(state.mark_delete_pos, PositionBound::StartExcluded)
            .await;
        Ok(live.saturating_sub(state.individually_deleted.size()))
    }

    /// True when at least one entry is readable.
    pub async fn has_more_entries(&self) -> Result<bool> {
        Ok(self.number_of_entries().await? > 0)
    }

    /// Finds the position of the newest entry satisfying `predicate`,
    /// assuming the predicate flips from true to false at most once in
    /// log order. `None` when no entry matches.
    ///
    /// Performs at most `ceil(log2(n)) + 2` entry reads over the `n`
    /// entries in scope.
    pub async fn find_newest_matching<F>(
        &self,
        scope: SearchScope,
        predicate: F,
    ) -> Result<Option<Position>>
    where
        F: Fn(&Entry) -> bool + Send + Sync,
    {
        let start = {
            let state = self.state.lock().await;
            self.ensure_active(&state)?;
            match scope {
                SearchScope::AllAvailable => self.ledger.first_live_position().await,
                SearchScope::Active => self.ledger.nth_live_at_or_after(state.read_pos, 1).await,
            }
        };
        let Some(start) = start else {
            return Ok(None);
        };
        let total = self
            .ledger
            .entries_count_from(start, PositionBound::StartIncluded)
            .await;
        FindNewestSearch::new(Arc::clone(&self.ledger), start, total, predicate)
            .run()
            .await
    }

    /// The position of the next entry to hand out.
    pub async fn read_position(&self) -> Position {
        self.state.lock().await.read_pos
    }

    /// The greatest position at or below which everything is
    /// acknowledged.
    pub async fn mark_delete_position(&self) -> Position {
        self.state.lock().await.mark_delete_pos
    }

    /// True when `position` is acknowledged above the mark-delete point.
    pub async fn is_individually_deleted(&self, position: Position) -> bool {
        self.state.lock().await.individually_deleted.contains(position)
    }

    /// True when no acknowledgment holes exist above the mark-delete
    /// point.
    pub async fn is_individually_deleted_entries_empty(&self) -> bool {
        self.state.lock().await.individually_deleted.is_empty()
    }

    /// The dedicated cursor ledger currently referenced by this
    /// cursor's durable state, when snapshots have spilled out of the
    /// metadata store.
    pub async fn persistent_ledger_id(&self) -> Option<SegmentId> {
        self.persistence.cursor_ledger_id().await
    }

    /// Closes the cursor after persisting its latest state. Further
    /// operations fail with [`Error::CursorAlreadyClosed`]; durable
    /// state is preserved for the next open.
    pub async fn close(&self) -> Result<()> {
        let snapshot = {
            let mut state = self.state.lock().await;
            if state.status != CursorStatus::Active {
                return Ok(());
            }
            state.status = CursorStatus::Closed;
            if let Some(pending) = state.pending_read.take() {
                let _ = pending.cancel.send(());
            }
            self.snapshot(&state)
        };
        self.persistence.flush_with(snapshot).await
    }

    /// Deletes the cursor and all of its durable state. Terminal.
    pub(crate) async fn delete_cursor(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.status = CursorStatus::Deleted;
            if let Some(pending) = state.pending_read.take() {
                let _ = pending.cancel.send(());
            }
        }
        self.persistence.delete_durable().await
    }
}
