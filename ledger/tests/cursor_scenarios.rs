//! End-to-end scenarios exercising a ledger and its cursors through the
//! public API, over shared in-memory stores so close/reopen cycles see
//! the same durable state.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use common::store::{InMemoryMetaStore, InMemorySegmentStore, MetaStore, SegmentStore};
use ledger::serde::CursorInfo;
use ledger::{Ledger, LedgerConfig, Position, SearchScope};

struct Stores {
    store: Arc<InMemorySegmentStore>,
    meta: Arc<InMemoryMetaStore>,
}

impl Stores {
    fn new() -> Self {
        Self {
            store: Arc::new(InMemorySegmentStore::new()),
            meta: Arc::new(InMemoryMetaStore::new()),
        }
    }

    async fn open(&self, name: &str, config: LedgerConfig) -> Ledger {
        Ledger::open(name, config, self.store.clone(), self.meta.clone())
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn empty_ledger_then_append_delivers_exactly_once() {
    // given
    let stores = Stores::new();
    let ledger = stores.open("L", LedgerConfig::default()).await;
    let cursor = ledger.open_cursor("c").await.unwrap();

    // when - nothing appended yet
    let entries = cursor.read_entries(10).await.unwrap();
    assert!(entries.is_empty());

    // when - one entry arrives
    ledger.append(Bytes::from("hello")).await.unwrap();
    let entries = cursor.read_entries(10).await.unwrap();

    // then
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].position, Position::new(0, 0));
    assert_eq!(entries[0].payload, Bytes::from("hello"));

    // and the entry is handed out only once
    assert!(cursor.read_entries(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn backlog_counts_entries_appended_after_cursor_open() {
    // given - cursors interleaved with appends
    let stores = Stores::new();
    let ledger = stores.open("L", LedgerConfig::default()).await;

    let c1 = ledger.open_cursor("c1").await.unwrap();
    ledger.append(Bytes::from("e1")).await.unwrap();
    let c2 = ledger.open_cursor("c2").await.unwrap();
    ledger.append(Bytes::from("e2")).await.unwrap();
    let c3 = ledger.open_cursor("c3").await.unwrap();
    ledger.append(Bytes::from("e3")).await.unwrap();
    let c4 = ledger.open_cursor("c4").await.unwrap();

    // then
    assert_eq!(c1.number_of_entries_in_backlog().await.unwrap(), 3);
    assert_eq!(c2.number_of_entries_in_backlog().await.unwrap(), 2);
    assert_eq!(c3.number_of_entries_in_backlog().await.unwrap(), 1);
    assert_eq!(c4.number_of_entries_in_backlog().await.unwrap(), 0);
}

#[tokio::test]
async fn out_of_order_acks_collapse_into_mark_delete() {
    // given
    let stores = Stores::new();
    let ledger = stores.open("L", LedgerConfig::default()).await;
    let cursor = ledger.open_cursor("c").await.unwrap();
    let mut p = Vec::new();
    for i in 1..=4 {
        p.push(ledger.append(Bytes::from(format!("e{}", i))).await.unwrap());
    }
    let (p1, p2, p3) = (p[0], p[1], p[2]);
    let initial = cursor.mark_delete_position().await;

    // when - ack p3 first: a hole above the watermark
    cursor.delete(p3).await.unwrap();
    assert_eq!(cursor.mark_delete_position().await, initial);
    assert!(cursor.is_individually_deleted(p3).await);
    assert!(!cursor.is_individually_deleted_entries_empty().await);

    // when - ack p1: contiguous with the watermark
    cursor.delete(p1).await.unwrap();
    assert_eq!(cursor.mark_delete_position().await, p1);

    // when - ack p2: bridges the gap, p3 absorbed too
    cursor.delete(p2).await.unwrap();

    // then
    assert_eq!(cursor.mark_delete_position().await, p3);
    assert!(cursor.is_individually_deleted_entries_empty().await);
}

#[tokio::test]
async fn rewind_rereads_everything_above_the_mark_delete() {
    // given
    let stores = Stores::new();
    let ledger = stores.open("L", LedgerConfig::default()).await;
    let cursor = ledger.open_cursor("c").await.unwrap();
    let mut p = Vec::new();
    for i in 1..=4 {
        p.push(ledger.append(Bytes::from(format!("e{}", i))).await.unwrap());
    }
    assert_eq!(cursor.read_entries(4).await.unwrap().len(), 4);

    // when
    cursor.rewind().await.unwrap();

    // then - everything is readable again
    assert_eq!(cursor.number_of_entries().await.unwrap(), 4);

    // when - acknowledge the first two
    cursor.mark_delete(p[1]).await.unwrap();

    // then - reading resumes at the third entry
    let entries = cursor.read_entries(10).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].position, p[2]);
    assert_eq!(entries[1].position, p[3]);
}

#[tokio::test]
async fn find_newest_matching_locates_retention_boundary() {
    // given - four expired entries followed by a live one
    let stores = Stores::new();
    let ledger = stores.open("L", LedgerConfig::default()).await;
    let cursor = ledger.open_cursor("c").await.unwrap();
    let mut positions = Vec::new();
    for _ in 0..4 {
        positions.push(ledger.append(Bytes::from("expired")).await.unwrap());
    }
    ledger.append(Bytes::from("not-expired")).await.unwrap();

    // when
    let reads = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&reads);
    let found = cursor
        .find_newest_matching(SearchScope::AllAvailable, move |entry| {
            counter.fetch_add(1, Ordering::SeqCst);
            entry.payload == "expired"
        })
        .await
        .unwrap();

    // then - the fourth appended entry, within the read bound
    assert_eq!(found, Some(positions[3]));
    // ceil(log2(5)) + 2
    assert!(reads.load(Ordering::SeqCst) <= 5);
}

#[tokio::test]
async fn large_ack_state_spills_to_cursor_ledger_and_survives_reopen() {
    let stores = Stores::new();
    let config = LedgerConfig {
        max_unacked_ranges_in_meta_store: 10,
        ..Default::default()
    };

    // given - 100 entries with every even one acknowledged
    let odd_payloads: Vec<Bytes> = {
        let ledger = stores.open("L", config.clone()).await;
        let cursor = ledger.open_cursor("c1").await.unwrap();
        let mut positions = Vec::new();
        for i in 0..100 {
            positions.push(
                ledger
                    .append(Bytes::from(format!("entry-{}", i)))
                    .await
                    .unwrap(),
            );
        }
        for k in 0..50 {
            cursor.delete(positions[2 * k]).await.unwrap();
        }
        ledger.close().await.unwrap();
        (0..100)
            .filter(|i| i % 2 == 1)
            .map(|i| Bytes::from(format!("entry-{}", i)))
            .collect()
    };

    // then - the metadata record references a cursor ledger whose last
    // entry holds the authoritative snapshot
    let record = stores.meta.get("L/c1").await.unwrap().unwrap();
    let info = CursorInfo::deserialize(&record.value).unwrap();
    let cursor_ledger = info.cursor_ledger.expect("snapshot should have spilled");
    assert!(info.individually_deleted.is_empty());

    let last = stores.store.last_entry(cursor_ledger).await.unwrap();
    let blob = stores.store.read(cursor_ledger, last, 1).await.unwrap();
    let snapshot = CursorInfo::deserialize(&blob[0].1).unwrap();
    // entry 0 was absorbed into the mark-delete; 49 holes remain
    assert_eq!(snapshot.mark_delete, Position::new(0, 0));
    assert_eq!(snapshot.individually_deleted.len(), 49);

    // when - reopen from the shared stores
    let ledger = stores.open("L", config).await;
    let cursor = ledger.open_cursor("c1").await.unwrap();

    // then
    assert_eq!(cursor.persistent_ledger_id().await, Some(cursor_ledger));
    assert_eq!(cursor.number_of_entries_in_backlog().await.unwrap(), 50);

    // and reading drains exactly the odd entries, in order
    let mut remaining = Vec::new();
    loop {
        let batch = cursor.read_entries(100).await.unwrap();
        if batch.is_empty() {
            break;
        }
        remaining.extend(batch);
    }
    assert_eq!(remaining.len(), 50);
    for (entry, expected) in remaining.iter().zip(odd_payloads.iter()) {
        assert_eq!(&entry.payload, expected);
    }
}
