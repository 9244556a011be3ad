//! Configuration options for a ledger and its cursors.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for opening a [`Ledger`](crate::Ledger).
///
/// All fields have working defaults; deserializing an empty document
/// yields the default configuration.
///
/// # Example
///
/// ```ignore
/// let config: LedgerConfig = serde_yaml::from_str(r#"
/// max_entries_per_segment: 1000
/// throttle_mark_delete: 10.0
/// "#)?;
/// let ledger = Ledger::open("events", config, store, meta).await?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Entries written to a segment before it is sealed and a new one is
    /// created.
    pub max_entries_per_segment: u64,

    /// Entry cache budget in bytes. `0` disables the cache entirely and
    /// all reads go to the segment store.
    pub max_cache_size: usize,

    /// Cursor snapshot rate limit, in persistences per second per cursor.
    /// Mark-delete calls above the rate coalesce into the next scheduled
    /// persistence (the latest value wins). `0` disables throttling.
    pub throttle_mark_delete: f64,

    /// Largest individually-deleted range count stored inline in the
    /// metadata store. A snapshot with more ranges spills to a dedicated
    /// cursor ledger.
    pub max_unacked_ranges_in_meta_store: usize,

    /// Snapshots written to a cursor ledger before it is rolled onto a
    /// fresh one (and the old one removed).
    pub metadata_max_entries_per_segment: u64,

    /// Retention size hint, in MB, consumed by the segment store's GC.
    /// Surfaced here only so embedders configure everything in one place;
    /// the ledger core does not enforce it.
    pub retention_size_mb: u64,

    /// Retention time hint, consumed by the segment store's GC.
    pub retention_time: Option<Duration>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_entries_per_segment: 50_000,
            max_cache_size: 16 * 1024 * 1024,
            throttle_mark_delete: 0.0,
            max_unacked_ranges_in_meta_store: 1000,
            metadata_max_entries_per_segment: 500,
            retention_size_mb: 0,
            retention_time: None,
        }
    }
}
