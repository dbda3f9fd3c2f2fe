//! On-wire data types and the value decoder.
//!
//! Column metadata carries a 2-byte type code per column, with container
//! codes (list/set/map) followed by their element type codes. [`parse_type`]
//! consumes those codes recursively so that later columns in the metadata
//! stay byte-aligned. [`decode_value`] maps a non-null cell payload plus its
//! parsed type to a native [`Value`]; null cells never reach it.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{CqlError, CqlResult};
use crate::value::Value;

use super::wire::WireReader;

/// Days between 0001-01-01 (chrono's day 1) and the Unix epoch.
const EPOCH_DAYS_FROM_CE: i64 = 719_163;

/// Nanoseconds in one day; the valid range of a `time` cell.
const NANOS_PER_DAY: i64 = 86_400_000_000_000;

/// A fully parsed column type.
///
/// The enum is closed: adding a protocol type is a compile-checked change.
/// Codes the driver does not implement are rejected at metadata-parse time;
/// [`CqlType::Unsupported`] names such a code where one must be carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CqlType {
    /// Server-defined custom type; the class name is consumed from metadata
    /// but values are permanently undecodable.
    Custom(String),
    /// ASCII text.
    Ascii,
    /// 8-byte signed integer.
    Bigint,
    /// Raw bytes.
    Blob,
    /// Single-byte boolean.
    Boolean,
    /// Distributed counter (8-byte signed integer).
    Counter,
    /// Arbitrary-precision decimal: 4-byte scale + variable-width unscaled.
    Decimal,
    /// 8-byte IEEE-754 double.
    Double,
    /// 4-byte IEEE-754 float.
    Float,
    /// 4-byte signed integer.
    Int,
    /// UTF-8 text.
    Text,
    /// Milliseconds since the Unix epoch, UTC.
    Timestamp,
    /// 16-byte UUID.
    Uuid,
    /// UTF-8 text (alias of text).
    Varchar,
    /// Variable-width signed integer; width equals the payload length.
    Varint,
    /// Time-based UUID, byte order preserved.
    Timeuuid,
    /// IPv4 or IPv6 address.
    Inet,
    /// Unsigned day count biased by 2^31 around the Unix epoch.
    Date,
    /// Nanoseconds since midnight.
    Time,
    /// 2-byte signed integer.
    Smallint,
    /// 1-byte signed integer.
    Tinyint,
    /// Ordered collection of one element type.
    List(Box<CqlType>),
    /// Key/value collection.
    Map(Box<CqlType>, Box<CqlType>),
    /// Unordered collection of one element type.
    Set(Box<CqlType>),
    /// Type code the driver does not implement (tuples, UDTs, future
    /// codes). [`parse_type`] rejects these outright since their trailing
    /// metadata cannot be consumed; value decoding always fails.
    Unsupported(u16),
}

impl CqlType {
    /// Human-readable name for error messages.
    pub fn name(&self) -> String {
        match self {
            Self::Custom(class) => format!("custom({class})"),
            Self::List(e) => format!("list<{}>", e.name()),
            Self::Set(e) => format!("set<{}>", e.name()),
            Self::Map(k, v) => format!("map<{}, {}>", k.name(), v.name()),
            Self::Unsupported(code) => format!("unsupported({code:#06x})"),
            other => format!("{other:?}").to_lowercase(),
        }
    }
}

/// Parse one `[option]` from column metadata: a 2-byte type code plus, for
/// custom and container codes, the extra payload that keeps later columns
/// aligned.
pub fn parse_type(reader: &mut WireReader<'_>) -> CqlResult<CqlType> {
    let code = reader.read_u16()?;
    let ty = match code {
        0x0000 => CqlType::Custom(reader.read_short_string()?),
        0x0001 => CqlType::Ascii,
        0x0002 => CqlType::Bigint,
        0x0003 => CqlType::Blob,
        0x0004 => CqlType::Boolean,
        0x0005 => CqlType::Counter,
        0x0006 => CqlType::Decimal,
        0x0007 => CqlType::Double,
        0x0008 => CqlType::Float,
        0x0009 => CqlType::Int,
        0x000A => CqlType::Text,
        0x000B => CqlType::Timestamp,
        0x000C => CqlType::Uuid,
        0x000D => CqlType::Varchar,
        0x000E => CqlType::Varint,
        0x000F => CqlType::Timeuuid,
        0x0010 => CqlType::Inet,
        0x0011 => CqlType::Date,
        0x0012 => CqlType::Time,
        0x0013 => CqlType::Smallint,
        0x0014 => CqlType::Tinyint,
        0x0020 => CqlType::List(Box::new(parse_type(reader)?)),
        0x0021 => {
            let key = parse_type(reader)?;
            let value = parse_type(reader)?;
            CqlType::Map(Box::new(key), Box::new(value))
        }
        0x0022 => CqlType::Set(Box::new(parse_type(reader)?)),
        // UDTs (0x0030), tuples (0x0031) and future codes carry trailing
        // metadata of unknown shape; skipping it blindly would desync
        // every later column spec.
        other => {
            return Err(CqlError::not_supported(format!(
                "type code {other:#06x} in column metadata"
            )))
        }
    };
    Ok(ty)
}

/// Decode a non-null cell payload into a [`Value`].
///
/// Null cells (`-1` wire length) bypass this table entirely and become
/// [`Value::Null`] at the cursor.
pub fn decode_value(ty: &CqlType, raw: &[u8]) -> CqlResult<Value> {
    match ty {
        CqlType::Ascii | CqlType::Text | CqlType::Varchar => {
            let s = std::str::from_utf8(raw)
                .map_err(|e| CqlError::data(format!("invalid UTF-8 in text cell: {e}")))?;
            Ok(Value::Text(s.to_string()))
        }
        CqlType::Tinyint
        | CqlType::Smallint
        | CqlType::Int
        | CqlType::Bigint
        | CqlType::Counter
        | CqlType::Varint => decode_integer(raw),
        CqlType::Boolean => {
            let byte = raw
                .first()
                .ok_or_else(|| CqlError::data("empty boolean cell"))?;
            Ok(Value::Boolean(*byte != 0))
        }
        CqlType::Decimal => decode_decimal(raw),
        CqlType::Double => {
            let bytes: [u8; 8] = raw
                .try_into()
                .map_err(|_| CqlError::data(format!("double cell of {} bytes", raw.len())))?;
            Ok(Value::Double(f64::from_be_bytes(bytes)))
        }
        CqlType::Float => {
            let bytes: [u8; 4] = raw
                .try_into()
                .map_err(|_| CqlError::data(format!("float cell of {} bytes", raw.len())))?;
            Ok(Value::Float(f32::from_be_bytes(bytes)))
        }
        CqlType::Timestamp => {
            let bytes: [u8; 8] = raw
                .try_into()
                .map_err(|_| CqlError::data(format!("timestamp cell of {} bytes", raw.len())))?;
            let millis = i64::from_be_bytes(bytes);
            DateTime::from_timestamp_millis(millis)
                .map(Value::Timestamp)
                .ok_or_else(|| CqlError::data(format!("timestamp {millis} ms out of range")))
        }
        CqlType::Uuid | CqlType::Timeuuid => Uuid::from_slice(raw)
            .map(Value::Uuid)
            .map_err(|_| CqlError::data(format!("uuid cell of {} bytes", raw.len()))),
        CqlType::Date => {
            let bytes: [u8; 4] = raw
                .try_into()
                .map_err(|_| CqlError::data(format!("date cell of {} bytes", raw.len())))?;
            // The stored value is an unsigned day count centered on the
            // epoch: actual offset = stored - 2^31.
            let offset = u32::from_be_bytes(bytes) as i64 - (1i64 << 31);
            i32::try_from(offset + EPOCH_DAYS_FROM_CE)
                .ok()
                .and_then(NaiveDate::from_num_days_from_ce_opt)
                .map(Value::Date)
                .ok_or_else(|| CqlError::data(format!("date offset {offset} out of range")))
        }
        CqlType::Time => {
            let bytes: [u8; 8] = raw
                .try_into()
                .map_err(|_| CqlError::data(format!("time cell of {} bytes", raw.len())))?;
            let nanos = i64::from_be_bytes(bytes);
            if !(0..NANOS_PER_DAY).contains(&nanos) {
                return Err(CqlError::data(format!("time {nanos} ns out of range")));
            }
            let secs = (nanos / 1_000_000_000) as u32;
            let frac = (nanos % 1_000_000_000) as u32;
            NaiveTime::from_num_seconds_from_midnight_opt(secs, frac)
                .map(Value::Time)
                .ok_or_else(|| CqlError::data(format!("time {nanos} ns out of range")))
        }
        CqlType::Inet => match raw.len() {
            4 => {
                let bytes: [u8; 4] = raw.try_into().or(Err(CqlError::data("inet cell")))?;
                Ok(Value::Inet(IpAddr::V4(Ipv4Addr::from(bytes))))
            }
            16 => {
                let bytes: [u8; 16] = raw.try_into().or(Err(CqlError::data("inet cell")))?;
                Ok(Value::Inet(IpAddr::V6(Ipv6Addr::from(bytes))))
            }
            n => Err(CqlError::data(format!("inet cell of {n} bytes"))),
        },
        CqlType::Blob => Ok(Value::Blob(raw.to_vec())),
        CqlType::List(element) | CqlType::Set(element) => {
            let mut reader = WireReader::new(raw);
            let count = read_collection_count(&mut reader)?;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(decode_cell(element, reader.read_bytes()?)?);
            }
            Ok(Value::List(items))
        }
        CqlType::Map(key_ty, value_ty) => {
            let mut reader = WireReader::new(raw);
            let count = read_collection_count(&mut reader)?;
            let mut entries = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let key = decode_cell(key_ty, reader.read_bytes()?)?;
                let value = decode_cell(value_ty, reader.read_bytes()?)?;
                entries.push((key, value));
            }
            Ok(Value::Map(entries))
        }
        CqlType::Custom(class) => Err(CqlError::not_supported(format!(
            "custom type {class} cannot be decoded"
        ))),
        CqlType::Unsupported(code) => Err(CqlError::not_supported(format!(
            "type code {code:#06x} cannot be decoded"
        ))),
    }
}

/// Decode a possibly-null cell: nulls become [`Value::Null`], everything
/// else goes through the type table.
pub fn decode_cell(ty: &CqlType, raw: Option<&[u8]>) -> CqlResult<Value> {
    match raw {
        None => Ok(Value::Null),
        Some(bytes) => decode_value(ty, bytes),
    }
}

/// Sign-extended big-endian integer whose width is the payload length.
/// Fixed-width codes and varints decode identically; anything past 16 bytes
/// cannot be represented natively.
fn decode_integer(raw: &[u8]) -> CqlResult<Value> {
    if raw.len() > 16 {
        return Err(CqlError::data(format!(
            "integer cell of {} bytes exceeds 128 bits",
            raw.len()
        )));
    }
    let mut acc: i128 = if raw.first().is_some_and(|b| b & 0x80 != 0) {
        -1
    } else {
        0
    };
    for &byte in raw {
        acc = (acc << 8) | byte as i128;
    }
    match i64::try_from(acc) {
        Ok(n) => Ok(Value::Int(n)),
        Err(_) => Ok(Value::Varint(acc)),
    }
}

/// Decimal cells: 4-byte signed scale then a varint unscaled value. The
/// result is exact; nothing rounds through a binary float.
fn decode_decimal(raw: &[u8]) -> CqlResult<Value> {
    if raw.len() < 4 {
        return Err(CqlError::data(format!("decimal cell of {} bytes", raw.len())));
    }
    let scale = i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let unscaled = match decode_integer(&raw[4..])? {
        Value::Int(n) => n as i128,
        Value::Varint(n) => n,
        _ => unreachable!("decode_integer yields integers"),
    };

    if scale < 0 {
        // Negative scale means trailing zeros: unscaled * 10^-scale.
        let factor = 10i128
            .checked_pow(scale.unsigned_abs())
            .ok_or_else(|| CqlError::data(format!("decimal scale {scale} out of range")))?;
        let widened = unscaled
            .checked_mul(factor)
            .ok_or_else(|| CqlError::data("decimal magnitude exceeds 128 bits"))?;
        return Decimal::try_from_i128_with_scale(widened, 0)
            .map(Value::Decimal)
            .map_err(|e| CqlError::data(format!("decimal out of range: {e}")));
    }

    Decimal::try_from_i128_with_scale(unscaled, scale as u32)
        .map(Value::Decimal)
        .map_err(|e| CqlError::data(format!("decimal out of range: {e}")))
}

fn read_collection_count(reader: &mut WireReader<'_>) -> CqlResult<usize> {
    let count = reader.read_i32()?;
    usize::try_from(count)
        .map_err(|_| CqlError::data(format!("negative collection count {count}")))
}
