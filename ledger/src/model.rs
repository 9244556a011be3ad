//! Core data types for the ledger API.

use bytes::Bytes;

use crate::position::Position;

/// An entry read from the log.
///
/// The payload is reference-counted (`Bytes`), so the entry cache and the
/// caller share ownership; the payload memory is released when the last
/// holder drops it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The position assigned to this entry at append time.
    pub position: Position,

    /// The opaque payload. The ledger does not interpret or validate the
    /// contents.
    pub payload: Bytes,
}

impl Entry {
    pub fn new(position: Position, payload: Bytes) -> Self {
        Self { position, payload }
    }
}

/// Controls whether individually acknowledged entries participate in an
/// operation that walks the log.
///
/// Used by [`Cursor::skip_entries`](crate::Cursor::skip_entries) (do
/// skipped-but-already-acked positions count toward the requested
/// distance?) and [`Cursor::get_nth_entry`](crate::Cursor::get_nth_entry)
/// (are acked positions yielded?).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletedEntriesPolicy {
    /// Individually deleted positions count and may be yielded.
    Include,
    /// Individually deleted positions are transparent.
    Exclude,
}

/// Range over which a find-newest search runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Search from the earliest entry still available in the log.
    AllAvailable,
    /// Search from the cursor's current read position.
    Active,
}
