//! Variable-length integer encoding.
//!
//! Unsigned values use the classic base-128 scheme: seven value bits per
//! byte, high bit set on every byte except the last. Small values (the
//! common case for entry counts and relative ids) encode in one byte;
//! `u64::MAX` takes ten.
//!
//! Signed values are zigzag-mapped onto unsigned ones first
//! (`0, -1, 1, -2, ...` -> `0, 1, 2, 3, ...`) so small negative values,
//! notably the `-1` "before first entry" entry id, stay short.

use bytes::{BufMut, BytesMut};

use crate::serde::DeserializeError;

/// Variable-length u64 encoding (base-128, little-endian groups).
pub mod var_u64 {
    use super::*;

    /// Appends the encoding of `value` to `buf`.
    pub fn serialize(value: u64, buf: &mut BytesMut) {
        let mut v = value;
        loop {
            let byte = (v & 0x7F) as u8;
            v >>= 7;
            if v == 0 {
                buf.put_u8(byte);
                return;
            }
            buf.put_u8(byte | 0x80);
        }
    }

    /// Decodes a value from the front of `buf`, advancing past the
    /// consumed bytes.
    ///
    /// # Errors
    ///
    /// Fails on an empty or truncated buffer, or when the encoding runs
    /// past ten bytes (the maximum for a u64).
    pub fn deserialize(buf: &mut &[u8]) -> Result<u64, DeserializeError> {
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        for (i, &byte) in buf.iter().enumerate() {
            if i >= 10 {
                break;
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                *buf = &buf[i + 1..];
                return Ok(value);
            }
            shift += 7;
        }
        if buf.len() >= 10 {
            Err(DeserializeError::new("var_u64 encoding exceeds 10 bytes"))
        } else {
            Err(DeserializeError::new(
                "unexpected end of input while decoding var_u64",
            ))
        }
    }
}

/// Variable-length i64 encoding (zigzag over [`var_u64`]).
pub mod var_i64 {
    use super::*;

    fn zigzag(value: i64) -> u64 {
        ((value << 1) ^ (value >> 63)) as u64
    }

    fn unzigzag(value: u64) -> i64 {
        ((value >> 1) as i64) ^ -((value & 1) as i64)
    }

    /// Appends the encoding of `value` to `buf`.
    pub fn serialize(value: i64, buf: &mut BytesMut) {
        var_u64::serialize(zigzag(value), buf);
    }

    /// Decodes a value from the front of `buf`, advancing past the
    /// consumed bytes.
    pub fn deserialize(buf: &mut &[u8]) -> Result<i64, DeserializeError> {
        var_u64::deserialize(buf).map(unzigzag)
    }
}
