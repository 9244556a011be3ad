//! OpenData Ledger - durable multi-consumer cursors over a segmented log.
//!
//! A [`Ledger`] is an append-only log of opaque byte payloads. Producers
//! append entries and each entry receives a strictly increasing
//! [`Position`]. Any number of named [`Cursor`]s independently track
//! their progress through the log, acknowledging entries in order or out
//! of order, and survive process restart without losing acknowledgment
//! state.
//!
//! # Architecture
//!
//! The physical storage is external: entries live in a segmented log
//! service behind the `SegmentStore` trait, and ledger/cursor metadata
//! records live in a versioned key-value store behind the `MetaStore`
//! trait (both in the `common` crate, with in-memory implementations for
//! tests and embedded use).
//!
//! On top of those, this crate implements:
//!
//! - the position algebra and the coalesced range set holding
//!   out-of-order acknowledgments,
//! - a bounded LRU cache of recently appended payloads,
//! - the cursor state machine: read position, mark-delete position, and
//!   the individually-deleted set, maintained under concurrent reads,
//!   acks, seeks, rewinds, resets and skips,
//! - read-or-wait delivery with cancellation,
//! - a bounded binary search for the newest entry matching a predicate,
//! - durable cursor snapshots, inline in the metadata store while small
//!   and spilled to a dedicated cursor ledger when large, with
//!   crash-consistent recovery.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use common::{InMemoryMetaStore, InMemorySegmentStore};
//! use ledger::{Ledger, LedgerConfig};
//!
//! let store = Arc::new(InMemorySegmentStore::new());
//! let meta = Arc::new(InMemoryMetaStore::new());
//! let ledger = Ledger::open("events", LedgerConfig::default(), store, meta).await?;
//!
//! let cursor = ledger.open_cursor("billing").await?;
//! ledger.append(Bytes::from("order-created")).await?;
//!
//! let entries = cursor.read_entries(10).await?;
//! cursor.mark_delete(entries.last().unwrap().position).await?;
//! ```

mod cache;
mod config;
mod cursor;
mod error;
mod find;
mod ledger;
mod model;
mod persist;
mod position;
mod rangeset;
pub mod serde;

pub use config::LedgerConfig;
pub use cursor::Cursor;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use model::{DeletedEntriesPolicy, Entry, SearchScope};
pub use position::{Position, PositionBound};
