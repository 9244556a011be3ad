//! Entry positions and their ordering.
//!
//! A [`Position`] identifies an entry as a `(segment_id, entry_id)` pair.
//! Positions are totally ordered lexicographically, which matches append
//! order because segment ids grow monotonically and entry ids are dense
//! within a segment.
//!
//! The entry id `-1` is a first-class value meaning "before the first
//! entry of the segment". It is the natural initial mark-delete for a
//! cursor opened on a segment that has not received entries yet.

use common::store::{EntryId, SegmentId};

/// Totally ordered identifier of an entry in the log.
///
/// The derived ordering is lexicographic over `(segment_id, entry_id)`,
/// which is exactly the log order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub segment_id: SegmentId,
    pub entry_id: EntryId,
}

impl Position {
    pub fn new(segment_id: SegmentId, entry_id: EntryId) -> Self {
        Self {
            segment_id,
            entry_id,
        }
    }

    /// The position before the first entry of `segment_id`.
    pub fn before_segment(segment_id: SegmentId) -> Self {
        Self::new(segment_id, -1)
    }

    /// The next position within the same segment. Segment rollover is
    /// resolved lazily by the log view, so `next` of the last entry of a
    /// segment is a position that may never hold an entry.
    pub fn next(&self) -> Self {
        Self::new(self.segment_id, self.entry_id + 1)
    }

    /// True when this position denotes "before the first entry" rather
    /// than an actual entry.
    pub fn is_before_first(&self) -> bool {
        self.entry_id < 0
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.segment_id, self.entry_id)
    }
}

/// Whether a distance computation counts its start position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionBound {
    StartIncluded,
    StartExcluded,
}
