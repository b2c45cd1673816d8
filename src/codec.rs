//! Typed record/value codec. A record is `[field-count varint][value...]`;
//! each value is `[kind u8][length varint][payload]`.

use crate::error::{DecentError, Result};
use crate::varint::{read_varint_i64, read_varint_u64, varint_len_i64, write_varint_i64, write_varint_u64};

const KIND_NULL: u8 = 0;
const KIND_BOOL: u8 = 1;
const KIND_INT64: u8 = 2;
const KIND_FLOAT64: u8 = 3;
const KIND_TEXT: u8 = 4;
const KIND_BLOB: u8 = 5;

/// The closed sum type of storable values. Dispatch on `Value` is always an
/// explicit tag match, never runtime polymorphism.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    fn kind(&self) -> u8 {
        match self {
            Value::Null => KIND_NULL,
            Value::Bool(_) => KIND_BOOL,
            Value::Int64(_) => KIND_INT64,
            Value::Float64(_) => KIND_FLOAT64,
            Value::Text(_) => KIND_TEXT,
            Value::Blob(_) => KIND_BLOB,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.kind());
        match self {
            Value::Null => write_varint_u64(out, 0),
            Value::Bool(b) => {
                write_varint_u64(out, 1);
                out.push(if *b { 1 } else { 0 });
            }
            Value::Int64(v) => {
                write_varint_u64(out, varint_len_i64(*v) as u64);
                write_varint_i64(out, *v);
            }
            Value::Float64(f) => {
                write_varint_u64(out, 8);
                out.extend_from_slice(&f.to_le_bytes());
            }
            Value::Text(s) => {
                write_varint_u64(out, s.len() as u64);
                out.extend_from_slice(s.as_bytes());
            }
            Value::Blob(b) => {
                write_varint_u64(out, b.len() as u64);
                out.extend_from_slice(b);
            }
        }
    }

    fn decode(buf: &[u8]) -> Result<(Value, usize)> {
        if buf.is_empty() {
            return Err(DecentError::Malformed("value kind byte missing".into()));
        }
        let kind = buf[0];
        let mut cursor = 1usize;
        let (len, n) = read_varint_u64(&buf[cursor..])?;
        cursor += n;
        let len = len as usize;
        let payload_end = cursor
            .checked_add(len)
            .ok_or_else(|| DecentError::Malformed("value length overflow".into()))?;
        if payload_end > buf.len() {
            return Err(DecentError::Malformed(
                "value payload exceeds available bytes".into(),
            ));
        }
        let payload = &buf[cursor..payload_end];
        let value = match kind {
            KIND_NULL => Value::Null,
            KIND_BOOL => {
                if len != 1 {
                    return Err(DecentError::Malformed("BOOL length must be 1".into()));
                }
                Value::Bool(payload[0] != 0)
            }
            KIND_INT64 => {
                let (v, consumed) = read_varint_i64(payload)?;
                if consumed != len {
                    return Err(DecentError::Malformed(
                        "INT64 payload has trailing bytes".into(),
                    ));
                }
                Value::Int64(v)
            }
            KIND_FLOAT64 => {
                if len != 8 {
                    return Err(DecentError::Malformed("FLOAT64 length must be 8".into()));
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(payload);
                Value::Float64(f64::from_le_bytes(bytes))
            }
            KIND_TEXT => {
                let s = std::str::from_utf8(payload)
                    .map_err(|e| DecentError::Malformed(format!("TEXT not valid UTF-8: {e}")))?;
                Value::Text(s.to_string())
            }
            KIND_BLOB => Value::Blob(payload.to_vec()),
            other => return Err(DecentError::Malformed(format!("unknown value kind {other}"))),
        };
        Ok((value, payload_end))
    }
}

/// An ordered tuple of [`Value`]s, the unit the codec encodes/decodes.
pub type Record = Vec<Value>;

pub fn encode_record(record: &Record) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint_u64(&mut out, record.len() as u64);
    for value in record {
        value.encode(&mut out);
    }
    out
}

/// Decode a record from `buf`. `buf` is the usable byte range of the page
/// cell holding the record; a field count requiring more fields than bytes
/// remain in `buf` is `Malformed` rather than a panic or silent truncation.
pub fn decode_record(buf: &[u8]) -> Result<Record> {
    let (field_count, mut cursor) = read_varint_u64(buf)?;
    let field_count = field_count as usize;
    // Every value needs at least a 1-byte kind + 1-byte length varint, so a
    // declared field count that can't possibly fit the remaining bytes is
    // rejected immediately instead of looping until a later decode fails.
    if field_count > buf.len().saturating_sub(cursor) {
        return Err(DecentError::Malformed(
            "field count exceeds available record bytes".into(),
        ));
    }
    let mut values = Vec::with_capacity(field_count);
    for _ in 0..field_count {
        let (value, consumed) = Value::decode(&buf[cursor..])?;
        cursor += consumed;
        values.push(value);
    }
    Ok(values)
}
