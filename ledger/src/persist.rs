//! Durable cursor snapshots: persistence, throttling, and recovery.
//!
//! A snapshot is the cursor's acknowledgment state captured at the
//! moment an operation finished in memory. Two durable representations
//! exist:
//!
//! - **Small form**: the whole snapshot, ranges inline, written to the
//!   metadata store with a compare-and-swap. Used while the range set is
//!   small and no cursor ledger exists.
//! - **Large form**: once the range count exceeds
//!   `max_unacked_ranges_in_meta_store`, the cursor switches to a
//!   dedicated cursor ledger (a segment of its own in the segment
//!   store). Every persistence appends one full-snapshot blob; only the
//!   last entry is authoritative. The metadata record then carries the
//!   ledger reference plus the mark-delete known at switch time, which
//!   recovery falls back to when the ledger is gone. The ledger is
//!   rolled onto a fresh segment after `metadata_max_entries_per_segment`
//!   blobs, and the superseded segment removed.
//!
//! A failed metadata CAS during a switch or roll deletes the segment
//! that was just created; orphan cursor ledgers are never left behind.
//!
//! Persistence I/O is serialized through a FIFO async mutex, so
//! completions observe submission order. Snapshot writes may be
//! rate-limited (`throttle_mark_delete`); calls above the rate coalesce
//! into the next scheduled flush and the latest snapshot wins. After a
//! crash, recovery may observe an older mark-delete, which is accepted.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use common::clock::Clock;
use common::store::{
    ExpectedVersion, MetaStore, MetaStoreError, SegmentId, SegmentStore, SegmentStoreError,
};

use crate::config::LedgerConfig;
use crate::error::{Error, Result};
use crate::ledger::LedgerCore;
use crate::position::Position;
use crate::serde::CursorInfo;

/// Cursor state captured for one persistence.
#[derive(Debug, Clone)]
pub(crate) struct CursorSnapshot {
    pub(crate) mark_delete: Position,
    pub(crate) individually_deleted: Vec<(Position, Position)>,
    pub(crate) last_active: u64,
}

/// State reconstructed from durable storage on cursor open.
pub(crate) struct RecoveredCursor {
    pub(crate) mark_delete: Position,
    pub(crate) individually_deleted: Vec<(Position, Position)>,
}

/// Durable coordinates of the cursor record. Guarded by the FIFO
/// persistence mutex, so the values always describe the last completed
/// write.
struct DurableCoords {
    cursor_ledger: Option<SegmentId>,
    cursor_ledger_entries: u64,
    meta_version: Option<u64>,
}

struct ThrottleState {
    last_persist_ms: Option<u64>,
    pending: Option<CursorSnapshot>,
    flusher_scheduled: bool,
}

pub(crate) struct CursorPersistence {
    meta_key: String,
    cursor_name: String,
    store: Arc<dyn SegmentStore>,
    meta: Arc<dyn MetaStore>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    coords: Mutex<DurableCoords>,
    throttle: StdMutex<ThrottleState>,
}

impl CursorPersistence {
    pub(crate) fn new(core: &Arc<LedgerCore>, cursor_name: &str) -> Self {
        Self {
            meta_key: core.cursor_meta_key(cursor_name),
            cursor_name: cursor_name.to_string(),
            store: Arc::clone(core.store()),
            meta: Arc::clone(core.meta()),
            clock: Arc::clone(core.clock()),
            config: core.config().clone(),
            coords: Mutex::new(DurableCoords {
                cursor_ledger: None,
                cursor_ledger_entries: 0,
                meta_version: None,
            }),
            throttle: StdMutex::new(ThrottleState {
                last_persist_ms: None,
                pending: None,
                flusher_scheduled: false,
            }),
        }
    }

    /// The cursor ledger the durable record currently references.
    pub(crate) async fn cursor_ledger_id(&self) -> Option<SegmentId> {
        self.coords.lock().await.cursor_ledger
    }

    /// Persists a snapshot, honoring the mark-delete throttle: above the
    /// configured rate the snapshot is parked for the next scheduled
    /// flush and this call returns without touching storage.
    pub(crate) async fn schedule(this: &Arc<Self>, snapshot: CursorSnapshot) -> Result<()> {
        let throttle = this.config.throttle_mark_delete;
        if throttle <= 0.0 {
            return this.persist(snapshot).await;
        }
        let interval_ms = (1000.0 / throttle).ceil() as u64;
        let now = this.clock.now_millis();

        let deferred = {
            let mut state = this.throttle.lock().unwrap();
            match state.last_persist_ms {
                Some(last) if now < last.saturating_add(interval_ms) => {
                    state.pending = Some(snapshot.clone());
                    let spawn_flusher = !state.flusher_scheduled;
                    state.flusher_scheduled = true;
                    let delay = last.saturating_add(interval_ms).saturating_sub(now);
                    Some((spawn_flusher, delay))
                }
                _ => {
                    state.last_persist_ms = Some(now);
                    None
                }
            }
        };

        match deferred {
            None => this.persist(snapshot).await,
            Some((spawn_flusher, delay_ms)) => {
                if spawn_flusher {
                    let this = Arc::clone(this);
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        this.run_flusher(interval_ms).await;
                    });
                }
                Ok(())
            }
        }
    }

    /// Drains coalesced snapshots, one per throttle interval, until no
    /// more arrive. Failures of scheduled writes can only be logged; the
    /// caller that parked the snapshot has long returned.
    async fn run_flusher(self: Arc<Self>, interval_ms: u64) {
        loop {
            let snapshot = {
                let mut state = self.throttle.lock().unwrap();
                match state.pending.take() {
                    Some(snapshot) => {
                        state.last_persist_ms = Some(self.clock.now_millis());
                        snapshot
                    }
                    None => {
                        state.flusher_scheduled = false;
                        return;
                    }
                }
            };
            if let Err(err) = self.persist(snapshot).await {
                warn!(
                    cursor = %self.cursor_name,
                    error = %err,
                    "scheduled cursor persistence failed"
                );
            }
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
    }

    /// Persists `snapshot` immediately, superseding anything parked by
    /// the throttle. Used by open, close and reset, which must not
    /// return before the state is durable; forced writes do not consume
    /// the throttle window.
    pub(crate) async fn flush_with(&self, snapshot: CursorSnapshot) -> Result<()> {
        self.throttle.lock().unwrap().pending = None;
        self.persist(snapshot).await
    }

    async fn persist(&self, snapshot: CursorSnapshot) -> Result<()> {
        let mut coords = self.coords.lock().await;
        let fits_meta_store =
            snapshot.individually_deleted.len() <= self.config.max_unacked_ranges_in_meta_store;
        if coords.cursor_ledger.is_none() && fits_meta_store {
            self.persist_to_meta_store(&mut coords, &snapshot).await
        } else {
            self.persist_to_cursor_ledger(&mut coords, &snapshot).await
        }
    }

    async fn persist_to_meta_store(
        &self,
        coords: &mut DurableCoords,
        snapshot: &CursorSnapshot,
    ) -> Result<()> {
        let info = CursorInfo {
            mark_delete: snapshot.mark_delete,
            cursor_ledger: None,
            individually_deleted: snapshot.individually_deleted.clone(),
            last_active: snapshot.last_active,
        };
        let expected = match coords.meta_version {
            Some(version) => ExpectedVersion::Exact(version),
            None => ExpectedVersion::Absent,
        };
        let version = self
            .meta
            .put(&self.meta_key, info.serialize(), expected)
            .await?;
        coords.meta_version = Some(version);
        debug!(
            cursor = %self.cursor_name,
            mark_delete = %snapshot.mark_delete,
            ranges = snapshot.individually_deleted.len(),
            "persisted cursor snapshot inline"
        );
        Ok(())
    }

    async fn persist_to_cursor_ledger(
        &self,
        coords: &mut DurableCoords,
        snapshot: &CursorSnapshot,
    ) -> Result<()> {
        let rollover = match coords.cursor_ledger {
            None => true,
            Some(_) => coords.cursor_ledger_entries >= self.config.metadata_max_entries_per_segment,
        };
        if rollover {
            return self.switch_cursor_ledger(coords, snapshot).await;
        }
        let Some(ledger_id) = coords.cursor_ledger else {
            return Err(Error::LogWrite("cursor ledger vanished".to_string()));
        };
        let blob = snapshot_blob(snapshot, Some(ledger_id));
        match self.store.append(ledger_id, blob).await {
            Ok(_) => {
                coords.cursor_ledger_entries += 1;
                debug!(
                    cursor = %self.cursor_name,
                    cursor_ledger = ledger_id,
                    mark_delete = %snapshot.mark_delete,
                    "appended cursor snapshot"
                );
                Ok(())
            }
            Err(SegmentStoreError::SegmentNotFound(_)) => Err(Error::LedgerNotExist(format!(
                "cursor ledger {} is gone",
                ledger_id
            ))),
            Err(err) => Err(Error::LogWrite(err.to_string())),
        }
    }

    /// Creates a fresh cursor ledger, writes the snapshot there, and
    /// points the metadata record at it. On a lost CAS the fresh segment
    /// is removed before the error surfaces.
    async fn switch_cursor_ledger(
        &self,
        coords: &mut DurableCoords,
        snapshot: &CursorSnapshot,
    ) -> Result<()> {
        let new_id = self
            .store
            .create()
            .await
            .map_err(|e| Error::LogWrite(e.to_string()))?;
        let blob = snapshot_blob(snapshot, Some(new_id));
        if let Err(err) = self.store.append(new_id, blob).await {
            let _ = self.store.remove(new_id).await;
            return Err(Error::LogWrite(err.to_string()));
        }

        // The record keeps the mark-delete as a recovery fallback; the
        // ranges live only in the cursor ledger from here on.
        let info = CursorInfo {
            mark_delete: snapshot.mark_delete,
            cursor_ledger: Some(new_id),
            individually_deleted: Vec::new(),
            last_active: snapshot.last_active,
        };
        let expected = match coords.meta_version {
            Some(version) => ExpectedVersion::Exact(version),
            None => ExpectedVersion::Absent,
        };
        match self.meta.put(&self.meta_key, info.serialize(), expected).await {
            Ok(version) => {
                let previous = coords.cursor_ledger.replace(new_id);
                coords.cursor_ledger_entries = 1;
                coords.meta_version = Some(version);
                if let Some(old_id) = previous {
                    if let Err(err) = self.store.remove(old_id).await {
                        warn!(
                            cursor = %self.cursor_name,
                            cursor_ledger = old_id,
                            error = %err,
                            "failed to remove superseded cursor ledger"
                        );
                    }
                }
                info!(
                    cursor = %self.cursor_name,
                    cursor_ledger = new_id,
                    "cursor snapshots now stored in cursor ledger"
                );
                Ok(())
            }
            Err(err) => {
                if let Err(remove_err) = self.store.remove(new_id).await {
                    warn!(
                        cursor = %self.cursor_name,
                        cursor_ledger = new_id,
                        error = %remove_err,
                        "failed to clean up orphan cursor ledger"
                    );
                }
                Err(err.into())
            }
        }
    }

    /// Reconstructs the cursor state from durable storage.
    ///
    /// Recovery ladder: metadata record, then the last entry of the
    /// cursor ledger it references, then the record's own mark-delete
    /// when the ledger is unreadable. `None` when the cursor was never
    /// persisted.
    pub(crate) async fn recover(&self) -> Result<Option<RecoveredCursor>> {
        let Some(record) = self.meta.get(&self.meta_key).await.map_err(Error::from)? else {
            return Ok(None);
        };
        let info = CursorInfo::deserialize(&record.value)
            .map_err(|e| Error::BrokenCursor(format!("cursor record undecodable: {}", e)))?;

        let mut coords = self.coords.lock().await;
        coords.meta_version = Some(record.version);

        if let Some(ledger_id) = info.cursor_ledger {
            match self.read_last_snapshot(ledger_id).await {
                Ok((stored, entries)) => {
                    coords.cursor_ledger = Some(ledger_id);
                    coords.cursor_ledger_entries = entries;
                    return Ok(Some(RecoveredCursor {
                        mark_delete: stored.mark_delete,
                        individually_deleted: stored.individually_deleted,
                    }));
                }
                Err(err) => {
                    warn!(
                        cursor = %self.cursor_name,
                        cursor_ledger = ledger_id,
                        error = %err,
                        "cursor ledger unreadable, falling back to metadata record"
                    );
                    coords.cursor_ledger = None;
                    coords.cursor_ledger_entries = 0;
                }
            }
        }

        Ok(Some(RecoveredCursor {
            mark_delete: info.mark_delete,
            individually_deleted: info.individually_deleted,
        }))
    }

    /// Reads the authoritative (last) snapshot blob of a cursor ledger.
    async fn read_last_snapshot(&self, ledger_id: SegmentId) -> Result<(CursorInfo, u64)> {
        let last = self.store.last_entry(ledger_id).await.map_err(|e| match e {
            SegmentStoreError::SegmentNotFound(_) => {
                Error::LedgerNotExist(format!("cursor ledger {} not found", ledger_id))
            }
            other => Error::LogRead(other.to_string()),
        })?;
        if last < 0 {
            return Err(Error::LedgerNotExist(format!(
                "cursor ledger {} is empty",
                ledger_id
            )));
        }
        let read = self
            .store
            .read(ledger_id, last, 1)
            .await
            .map_err(|e| Error::LogRead(e.to_string()))?;
        let Some((_, blob)) = read.into_iter().next() else {
            return Err(Error::LogRead(format!(
                "cursor ledger {} lost its last entry",
                ledger_id
            )));
        };
        let info = CursorInfo::deserialize(&blob)?;
        Ok((info, (last + 1) as u64))
    }

    /// Removes every durable trace of the cursor.
    pub(crate) async fn delete_durable(&self) -> Result<()> {
        let mut coords = self.coords.lock().await;
        self.throttle.lock().unwrap().pending = None;
        match self.meta.remove(&self.meta_key, ExpectedVersion::Any).await {
            Ok(()) | Err(MetaStoreError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }
        if let Some(ledger_id) = coords.cursor_ledger.take() {
            coords.cursor_ledger_entries = 0;
            match self.store.remove(ledger_id).await {
                Ok(()) | Err(SegmentStoreError::SegmentNotFound(_)) => {}
                Err(err) => return Err(Error::LogWrite(err.to_string())),
            }
        }
        coords.meta_version = None;
        info!(cursor = %self.cursor_name, "deleted cursor state");
        Ok(())
    }
}

fn snapshot_blob(snapshot: &CursorSnapshot, cursor_ledger: Option<SegmentId>) -> Bytes {
    CursorInfo {
        mark_delete: snapshot.mark_delete,
        cursor_ledger,
        individually_deleted: snapshot.individually_deleted.clone(),
        last_active: snapshot.last_active,
    }
    .serialize()
}

/// Removes the durable state of a cursor that is not open, including any
/// cursor ledger its record references.
pub(crate) async fn delete_cursor_state(core: &Arc<LedgerCore>, cursor_name: &str) -> Result<()> {
    let key = core.cursor_meta_key(cursor_name);
    let Some(record) = core.meta().get(&key).await.map_err(Error::from)? else {
        return Ok(());
    };
    if let Ok(info) = CursorInfo::deserialize(&record.value) {
        if let Some(ledger_id) = info.cursor_ledger {
            let _ = core.store().remove(ledger_id).await;
        }
    }
    match core.meta().remove(&key, ExpectedVersion::Any).await {
        Ok(()) | Err(MetaStoreError::NotFound) => Ok(()),
        Err(err) => Err(err.into()),
    }
}
