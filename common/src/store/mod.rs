//! External collaborator traits: the segment store and the metadata store.
//!
//! The ledger core treats both as black boxes. [`SegmentStore`] is the
//! physical home of log entries: a service that manages append-only,
//! individually addressable segments. [`MetaStore`] is a small key-value
//! store with optimistic concurrency, holding ledger and cursor metadata
//! records.
//!
//! Production deployments back these with a replicated log service and a
//! coordination store; [`in_memory`] provides process-local
//! implementations for tests and embedded use.

pub mod in_memory;

pub use in_memory::{InMemoryMetaStore, InMemorySegmentStore};

use async_trait::async_trait;
use bytes::Bytes;

/// Unique identifier of a segment, assigned by the segment store.
pub type SegmentId = u64;

/// Index of an entry within a segment. `-1` denotes "before the first
/// entry" and is never a valid read target.
pub type EntryId = i64;

/// Error type for segment store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentStoreError {
    /// The requested segment does not exist (never created, or removed).
    SegmentNotFound(SegmentId),
    /// The requested entry does not exist within the segment.
    EntryNotFound(SegmentId, EntryId),
    /// Append attempted on a sealed segment.
    SegmentSealed(SegmentId),
    /// Underlying storage failure.
    Storage(String),
}

impl std::fmt::Display for SegmentStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentStoreError::SegmentNotFound(id) => write!(f, "segment {} not found", id),
            SegmentStoreError::EntryNotFound(seg, ent) => {
                write!(f, "entry {}:{} not found", seg, ent)
            }
            SegmentStoreError::SegmentSealed(id) => write!(f, "segment {} is sealed", id),
            SegmentStoreError::Storage(msg) => write!(f, "segment storage error: {}", msg),
        }
    }
}

impl std::error::Error for SegmentStoreError {}

/// Result type alias for segment store operations.
pub type SegmentStoreResult<T> = std::result::Result<T, SegmentStoreError>;

/// Append-only segmented entry storage.
///
/// Segments are created empty, appended to, optionally sealed (after
/// which appends fail), and removed. Entry ids within a segment are dense
/// and start at zero.
#[async_trait]
pub trait SegmentStore: Send + Sync {
    /// Creates a new empty segment and returns its id. Ids are unique for
    /// the lifetime of the store and never reused.
    async fn create(&self) -> SegmentStoreResult<SegmentId>;

    /// Appends a payload to the segment, returning the assigned entry id.
    async fn append(&self, segment: SegmentId, payload: Bytes) -> SegmentStoreResult<EntryId>;

    /// Reads up to `max` entries starting at entry id `first`, in order.
    ///
    /// Returns fewer than `max` entries when the segment ends early; an
    /// empty vector when `first` is past the last entry.
    async fn read(
        &self,
        segment: SegmentId,
        first: EntryId,
        max: usize,
    ) -> SegmentStoreResult<Vec<(EntryId, Bytes)>>;

    /// Returns the id of the last entry in the segment, or `-1` when the
    /// segment is empty.
    async fn last_entry(&self, segment: SegmentId) -> SegmentStoreResult<EntryId>;

    /// Seals the segment; subsequent appends fail with
    /// [`SegmentStoreError::SegmentSealed`].
    async fn seal(&self, segment: SegmentId) -> SegmentStoreResult<()>;

    /// Removes the segment and its entries.
    async fn remove(&self, segment: SegmentId) -> SegmentStoreResult<()>;
}

/// A metadata record with its store-assigned version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaRecord {
    pub value: Bytes,
    pub version: u64,
}

/// Version expectation for compare-and-swap writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Write unconditionally.
    Any,
    /// The key must not exist yet.
    Absent,
    /// The key must exist at exactly this version.
    Exact(u64),
}

/// Error type for metadata store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaStoreError {
    /// The version expectation of a write was not met.
    BadVersion,
    /// The key does not exist.
    NotFound,
    /// Underlying store failure.
    Store(String),
}

impl std::fmt::Display for MetaStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaStoreError::BadVersion => write!(f, "metadata version mismatch"),
            MetaStoreError::NotFound => write!(f, "metadata record not found"),
            MetaStoreError::Store(msg) => write!(f, "metadata store error: {}", msg),
        }
    }
}

impl std::error::Error for MetaStoreError {}

/// Result type alias for metadata store operations.
pub type MetaStoreResult<T> = std::result::Result<T, MetaStoreError>;

/// Key-value metadata store with optimistic concurrency.
///
/// Every record carries a version incremented on each successful write.
/// Writes state their expectation via [`ExpectedVersion`]; a mismatch
/// fails with [`MetaStoreError::BadVersion`] and leaves the record
/// untouched.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Fetches a record, or `None` when the key does not exist.
    async fn get(&self, key: &str) -> MetaStoreResult<Option<MetaRecord>>;

    /// Writes a record if the version expectation holds. Returns the new
    /// version.
    async fn put(
        &self,
        key: &str,
        value: Bytes,
        expected: ExpectedVersion,
    ) -> MetaStoreResult<u64>;

    /// Removes a record if the version expectation holds. Removing an
    /// absent key fails with [`MetaStoreError::NotFound`].
    async fn remove(&self, key: &str, expected: ExpectedVersion) -> MetaStoreResult<()>;
}
