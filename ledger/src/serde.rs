//! Binary encoding of metadata records.
//!
//! Two record types are stored through the metadata store and the cursor
//! ledger:
//!
//! - [`LedgerInfo`]: the ordered list of segment ids making up a ledger,
//!   keyed by the ledger name.
//! - [`CursorInfo`]: a cursor snapshot: mark-delete position, the
//!   individually-deleted range set (inline only in the small form), the
//!   id of the dedicated cursor ledger when one is in use, and a
//!   last-active timestamp. The same record doubles as the blob format
//!   appended to the cursor ledger in the large form.
//!
//! # Record Format
//!
//! All records start with a version byte and a record type discriminator:
//!
//! ```text
//! | version (u8) | type (u8) | ... record-specific fields ... |
//! ```
//!
//! Integer fields use the varint encodings from `common::serde::varint`;
//! entry ids are signed (zigzag) so the `-1` "before first entry" value
//! stays a one-byte encoding.

use bytes::{BufMut, Bytes, BytesMut};

use common::serde::varint::{var_i64, var_u64};
use common::serde::DeserializeError;
use common::store::SegmentId;

use crate::position::Position;

/// Record format version (currently 0x01).
pub const RECORD_VERSION: u8 = 0x01;

/// Record type discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// Segment list of a ledger.
    LedgerInfo = 0x01,
    /// Cursor snapshot.
    CursorInfo = 0x02,
}

impl RecordType {
    fn check_header(self, data: &mut &[u8]) -> Result<(), DeserializeError> {
        if data.len() < 2 {
            return Err(DeserializeError::new("record too short for header"));
        }
        if data[0] != RECORD_VERSION {
            return Err(DeserializeError::new(format!(
                "unsupported record version: 0x{:02x}",
                data[0]
            )));
        }
        if data[1] != self as u8 {
            return Err(DeserializeError::new(format!(
                "unexpected record type: expected 0x{:02x}, got 0x{:02x}",
                self as u8, data[1]
            )));
        }
        *data = &data[2..];
        Ok(())
    }

    fn write_header(self, buf: &mut BytesMut) {
        buf.put_u8(RECORD_VERSION);
        buf.put_u8(self as u8);
    }
}

fn serialize_position(p: Position, buf: &mut BytesMut) {
    var_u64::serialize(p.segment_id, buf);
    var_i64::serialize(p.entry_id, buf);
}

fn deserialize_position(buf: &mut &[u8]) -> Result<Position, DeserializeError> {
    let segment_id = var_u64::deserialize(buf)?;
    let entry_id = var_i64::deserialize(buf)?;
    Ok(Position::new(segment_id, entry_id))
}

/// The ordered segment list of a ledger, persisted in the metadata store
/// under the ledger name.
///
/// Entry counts are not stored; they are recovered from the segment
/// store on open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LedgerInfo {
    pub segments: Vec<SegmentId>,
}

impl LedgerInfo {
    pub(crate) fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        RecordType::LedgerInfo.write_header(&mut buf);
        var_u64::serialize(self.segments.len() as u64, &mut buf);
        for &segment in &self.segments {
            var_u64::serialize(segment, &mut buf);
        }
        buf.freeze()
    }

    pub(crate) fn deserialize(mut data: &[u8]) -> Result<Self, DeserializeError> {
        let buf = &mut data;
        RecordType::LedgerInfo.check_header(buf)?;
        let len = var_u64::deserialize(buf)? as usize;
        let mut segments = Vec::with_capacity(len);
        for _ in 0..len {
            segments.push(var_u64::deserialize(buf)?);
        }
        Ok(Self { segments })
    }
}

/// A cursor snapshot record.
///
/// Stored in the metadata store keyed `"<ledger>/<cursor>"`. In the small
/// form `individually_deleted` is inline and `cursor_ledger` is `None`;
/// in the large form the ranges live in the blob appended to the cursor
/// ledger and the metadata record carries the ledger reference plus the
/// mark-delete known at the time of the switch (the recovery fallback).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorInfo {
    /// Greatest position at or below which everything is acknowledged.
    pub mark_delete: Position,
    /// Dedicated cursor ledger holding full snapshots, when in use.
    pub cursor_ledger: Option<SegmentId>,
    /// Acknowledged ranges above the mark-delete, as `[lo, hi)` pairs.
    pub individually_deleted: Vec<(Position, Position)>,
    /// Wall-clock of the last persistence, milliseconds since epoch.
    pub last_active: u64,
}

impl CursorInfo {
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        RecordType::CursorInfo.write_header(&mut buf);
        serialize_position(self.mark_delete, &mut buf);
        // 0 = no cursor ledger, otherwise id + 1
        var_u64::serialize(self.cursor_ledger.map_or(0, |id| id + 1), &mut buf);
        var_u64::serialize(self.individually_deleted.len() as u64, &mut buf);
        for &(lo, hi) in &self.individually_deleted {
            serialize_position(lo, &mut buf);
            serialize_position(hi, &mut buf);
        }
        var_u64::serialize(self.last_active, &mut buf);
        buf.freeze()
    }

    pub fn deserialize(mut data: &[u8]) -> Result<Self, DeserializeError> {
        let buf = &mut data;
        RecordType::CursorInfo.check_header(buf)?;
        let mark_delete = deserialize_position(buf)?;
        let cursor_ledger = match var_u64::deserialize(buf)? {
            0 => None,
            id => Some(id - 1),
        };
        let len = var_u64::deserialize(buf)? as usize;
        let mut individually_deleted = Vec::with_capacity(len);
        for _ in 0..len {
            let lo = deserialize_position(buf)?;
            let hi = deserialize_position(buf)?;
            individually_deleted.push((lo, hi));
        }
        let last_active = var_u64::deserialize(buf)?;
        Ok(Self {
            mark_delete,
            cursor_ledger,
            individually_deleted,
            last_active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_roundtrip_ledger_info() {
        // given
        let info = LedgerInfo {
            segments: vec![0, 1, 7, 123_456],
        };

        // when
        let encoded = info.serialize();
        let decoded = LedgerInfo::deserialize(&encoded).unwrap();

        // then
        assert_eq!(decoded, info);
    }

    #[test]
    fn should_roundtrip_empty_ledger_info() {
        let info = LedgerInfo { segments: vec![] };
        let decoded = LedgerInfo::deserialize(&info.serialize()).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn should_roundtrip_cursor_info_small_form() {
        // given
        let info = CursorInfo {
            mark_delete: Position::new(2, 17),
            cursor_ledger: None,
            individually_deleted: vec![
                (Position::new(2, 20), Position::new(2, 23)),
                (Position::new(3, 0), Position::new(3, 1)),
            ],
            last_active: 1_700_000_000_000,
        };

        // when
        let decoded = CursorInfo::deserialize(&info.serialize()).unwrap();

        // then
        assert_eq!(decoded, info);
    }

    #[test]
    fn should_roundtrip_cursor_info_with_ledger_reference() {
        // given - large form: ranges live in the cursor ledger
        let info = CursorInfo {
            mark_delete: Position::before_segment(0),
            cursor_ledger: Some(42),
            individually_deleted: vec![],
            last_active: 0,
        };

        // when
        let decoded = CursorInfo::deserialize(&info.serialize()).unwrap();

        // then
        assert_eq!(decoded, info);
        assert_eq!(decoded.mark_delete.entry_id, -1);
    }

    #[test]
    fn should_reject_wrong_record_type() {
        // given - a ledger info blob
        let blob = LedgerInfo { segments: vec![1] }.serialize();

        // when
        let result = CursorInfo::deserialize(&blob);

        // then
        assert!(result.is_err());
    }

    #[test]
    fn should_reject_unknown_version() {
        // given
        let mut data = CursorInfo {
            mark_delete: Position::new(0, 0),
            cursor_ledger: None,
            individually_deleted: vec![],
            last_active: 0,
        }
        .serialize()
        .to_vec();
        data[0] = 0x7F;

        // when
        let result = CursorInfo::deserialize(&data);

        // then
        assert!(result.is_err());
    }

    #[test]
    fn should_reject_truncated_record() {
        // given
        let blob = CursorInfo {
            mark_delete: Position::new(1, 1),
            cursor_ledger: Some(3),
            individually_deleted: vec![(Position::new(1, 5), Position::new(1, 9))],
            last_active: 123,
        }
        .serialize();

        // when - drop the tail
        let result = CursorInfo::deserialize(&blob[..blob.len() - 2]);

        // then
        assert!(result.is_err());
    }
}
