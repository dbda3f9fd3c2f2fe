//! Wire codec primitives.
//!
//! The native protocol builds every body out of a handful of notations:
//! fixed-width big-endian two's-complement integers, `[short]`-prefixed
//! UTF-8 strings, `[int]`-prefixed strings and byte blobs (where a negative
//! blob length means *null*, a state distinct from an empty blob), and
//! count-prefixed string maps and multimaps.

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{CqlError, CqlResult};

/// Largest byte length representable by a `[short string]`.
pub const MAX_SHORT_STRING: usize = u16::MAX as usize;

// ----------------------------------------------------------------------------
// Writers
// ----------------------------------------------------------------------------

/// Append `n` as a big-endian two's-complement integer of exactly `width`
/// bytes. `width` must be 1, 2, 4 or 8 and `n` must fit the signed range.
pub fn write_int(buf: &mut BytesMut, n: i64, width: usize) -> CqlResult<()> {
    let in_range = match width {
        1 => i8::try_from(n).is_ok(),
        2 => i16::try_from(n).is_ok(),
        4 => i32::try_from(n).is_ok(),
        8 => true,
        _ => {
            return Err(CqlError::interface(format!(
                "invalid integer width {width}"
            )))
        }
    };
    if !in_range {
        return Err(CqlError::interface(format!(
            "{n} out of range for a {width}-byte integer"
        )));
    }
    buf.put_slice(&n.to_be_bytes()[8 - width..]);
    Ok(())
}

/// Append a `[short string]`: 2-byte length prefix + UTF-8 bytes.
pub fn write_short_string(buf: &mut BytesMut, s: &str) -> CqlResult<()> {
    if s.len() > MAX_SHORT_STRING {
        return Err(CqlError::interface(format!(
            "string of {} bytes exceeds the short string limit",
            s.len()
        )));
    }
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

/// Append a `[long string]`: 4-byte length prefix + UTF-8 bytes. Used for
/// query text.
pub fn write_long_string(buf: &mut BytesMut, s: &str) -> CqlResult<()> {
    let len = i32::try_from(s.len())
        .map_err(|_| CqlError::interface("string exceeds the long string limit"))?;
    buf.put_i32(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

/// Append `[bytes]`: 4-byte signed length prefix + payload.
pub fn write_long_bytes(buf: &mut BytesMut, b: &[u8]) -> CqlResult<()> {
    let len = i32::try_from(b.len())
        .map_err(|_| CqlError::interface("blob exceeds the bytes limit"))?;
    buf.put_i32(len);
    buf.put_slice(b);
    Ok(())
}

/// Append a `[string map]`: 2-byte pair count, then (key, value) short
/// strings. Used by STARTUP.
pub fn write_string_map(buf: &mut BytesMut, map: &[(&str, &str)]) -> CqlResult<()> {
    let count = u16::try_from(map.len())
        .map_err(|_| CqlError::interface("string map has too many entries"))?;
    buf.put_u16(count);
    for (key, value) in map {
        write_short_string(buf, key)?;
        write_short_string(buf, value)?;
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------------

/// Cursor-style reader over a frame body.
///
/// Every read checks the remaining length first; running off the end of a
/// body is a protocol violation, reported as [`CqlError::Internal`].
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Create a reader over the given body.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// True once the whole body has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> CqlResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(CqlError::internal(format!(
                "body truncated: wanted {len} bytes at offset {}, {} remain",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> CqlResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a 2-byte unsigned big-endian integer.
    pub fn read_u16(&mut self) -> CqlResult<u16> {
        let mut slice = self.take(2)?;
        Ok(slice.get_u16())
    }

    /// Read a 2-byte signed big-endian integer.
    pub fn read_i16(&mut self) -> CqlResult<i16> {
        let mut slice = self.take(2)?;
        Ok(slice.get_i16())
    }

    /// Read a 4-byte signed big-endian integer.
    pub fn read_i32(&mut self) -> CqlResult<i32> {
        let mut slice = self.take(4)?;
        Ok(slice.get_i32())
    }

    /// Read a 4-byte unsigned big-endian integer.
    pub fn read_u32(&mut self) -> CqlResult<u32> {
        let mut slice = self.take(4)?;
        Ok(slice.get_u32())
    }

    /// Read an 8-byte signed big-endian integer.
    pub fn read_i64(&mut self) -> CqlResult<i64> {
        let mut slice = self.take(8)?;
        Ok(slice.get_i64())
    }

    /// Read a big-endian two's-complement integer of exactly `width` bytes,
    /// sign-extended to `i64`. `width` must be 1, 2, 4 or 8.
    pub fn read_int(&mut self, width: usize) -> CqlResult<i64> {
        match width {
            1 => Ok(self.read_u8()? as i8 as i64),
            2 => Ok(self.read_i16()? as i64),
            4 => Ok(self.read_i32()? as i64),
            8 => self.read_i64(),
            _ => Err(CqlError::interface(format!(
                "invalid integer width {width}"
            ))),
        }
    }

    /// Peek at the next 4 bytes as a signed integer without consuming them.
    pub fn peek_i32(&self) -> Option<i32> {
        if self.remaining() < 4 {
            return None;
        }
        let mut slice = &self.data[self.pos..];
        Some(slice.get_i32())
    }

    /// Skip `len` bytes.
    pub fn skip(&mut self, len: usize) -> CqlResult<()> {
        self.take(len).map(|_| ())
    }

    /// Read a `[short string]`.
    pub fn read_short_string(&mut self) -> CqlResult<String> {
        let len = self.read_u16()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| CqlError::internal(format!("invalid UTF-8 in string: {e}")))
    }

    /// Read a `[long string]`.
    pub fn read_long_string(&mut self) -> CqlResult<String> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(CqlError::internal("negative long string length"));
        }
        let raw = self.take(len as usize)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| CqlError::internal(format!("invalid UTF-8 in string: {e}")))
    }

    /// Read `[bytes]`: a 4-byte signed length, where `-1` (or any negative
    /// value) denotes null. `Ok(None)` is null; `Ok(Some(&[]))` is an empty,
    /// non-null payload. The two never collapse into each other.
    pub fn read_bytes(&mut self) -> CqlResult<Option<&'a [u8]>> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(None);
        }
        Ok(Some(self.take(len as usize)?))
    }

    /// Read a `[string list]`: 2-byte count, then short strings.
    pub fn read_string_list(&mut self) -> CqlResult<Vec<String>> {
        let count = self.read_u16()? as usize;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(self.read_short_string()?);
        }
        Ok(items)
    }

    /// Read a `[string multimap]`: 2-byte pair count, each pair a short
    /// string key and a string list value. SUPPORTED bodies use this.
    pub fn read_string_multimap(&mut self) -> CqlResult<HashMap<String, Vec<String>>> {
        let count = self.read_u16()? as usize;
        let mut map = HashMap::with_capacity(count.min(1024));
        for _ in 0..count {
            let key = self.read_short_string()?;
            let values = self.read_string_list()?;
            map.insert(key, values);
        }
        Ok(map)
    }
}
