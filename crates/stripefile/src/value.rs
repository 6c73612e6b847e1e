//! Decoded values and the row encoding inside column chunks
//!
//! A column chunk holds one column's rows for one row group:
//!
//! ```text
//! varint row_count
//! row_count × (varint frame_length, frame bytes)
//! ```
//!
//! Each frame holds exactly one encoded value. A frame that cannot be
//! delimited means the chunk itself is damaged; a frame that is delimited but
//! does not decode to a value of the column's type is a damaged record and
//! can be skipped without losing the position of the rows after it.

use bytes::{Buf, BufMut};
use serde::{Serialize, Serializer};

use crate::types::{TypeKind, TypeTree};

/// A decoded value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    #[serde(serialize_with = "serialize_hex")]
    Binary(Vec<u8>),
    /// Milliseconds since the Unix epoch
    Timestamp(i64),
    /// Days since the Unix epoch
    Date(i32),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Struct(Vec<Value>),
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of any integral value
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(*v as i64),
            Value::Short(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating point view of a float or double
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One decoded row
///
/// Values are aligned with the root struct's fields. Fields whose columns
/// were not included in the read are [`Value::Null`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    row_number: u64,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(row_number: u64, values: Vec<Value>) -> Self {
        Self { row_number, values }
    }

    /// Absolute position of this row in the file
    pub fn row_number(&self) -> u64 {
        self.row_number
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of the `field`-th root field
    pub fn get(&self, field: usize) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

const NULL_MARKER: u8 = 0;
const PRESENT_MARKER: u8 = 1;

/// Append a varint-framed encoding of `value` as type `type_id` to `out`
pub(crate) fn write_frame(
    types: &TypeTree,
    type_id: usize,
    value: &Value,
    out: &mut Vec<u8>,
) -> Result<(), String> {
    let mut frame = Vec::new();
    encode_value(types, type_id, value, &mut frame)?;
    prost::encoding::encode_varint(frame.len() as u64, out);
    out.extend_from_slice(&frame);
    Ok(())
}

fn encode_value(types: &TypeTree, type_id: usize, value: &Value, out: &mut Vec<u8>) -> Result<(), String> {
    let node = types
        .get(type_id)
        .ok_or_else(|| format!("unknown type id {}", type_id))?;
    if value.is_null() {
        out.put_u8(NULL_MARKER);
        return Ok(());
    }
    out.put_u8(PRESENT_MARKER);

    let mismatch = || format!("value {:?} does not fit column type {}", value, node.kind().name());
    match (node.kind(), value) {
        (TypeKind::Boolean, Value::Boolean(b)) => out.put_u8(*b as u8),
        (TypeKind::Byte, Value::Byte(v)) => put_signed(*v as i64, out),
        (TypeKind::Short, Value::Short(v)) => put_signed(*v as i64, out),
        (TypeKind::Int, Value::Int(v)) => put_signed(*v as i64, out),
        (TypeKind::Long, Value::Long(v)) => put_signed(*v, out),
        (TypeKind::Float, Value::Float(v)) => out.put_f32_le(*v),
        (TypeKind::Double, Value::Double(v)) => out.put_f64_le(*v),
        (TypeKind::String, Value::String(s)) => put_bytes(s.as_bytes(), out),
        (TypeKind::Binary, Value::Binary(b)) => put_bytes(b, out),
        (TypeKind::Timestamp, Value::Timestamp(v)) => put_signed(*v, out),
        (TypeKind::Date, Value::Date(v)) => put_signed(*v as i64, out),
        (TypeKind::List, Value::List(items)) => {
            prost::encoding::encode_varint(items.len() as u64, out);
            for item in items {
                encode_value(types, node.children()[0], item, out)?;
            }
        }
        (TypeKind::Map, Value::Map(entries)) => {
            prost::encoding::encode_varint(entries.len() as u64, out);
            for (key, item) in entries {
                encode_value(types, node.children()[0], key, out)?;
                encode_value(types, node.children()[1], item, out)?;
            }
        }
        (TypeKind::Struct, Value::Struct(fields)) => {
            if fields.len() != node.children().len() {
                return Err(mismatch());
            }
            for (field, &child) in fields.iter().zip(node.children()) {
                encode_value(types, child, field, out)?;
            }
        }
        _ => return Err(mismatch()),
    }
    Ok(())
}

fn put_signed(v: i64, out: &mut Vec<u8>) {
    // zig-zag
    prost::encoding::encode_varint(((v << 1) ^ (v >> 63)) as u64, out);
}

fn put_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    prost::encoding::encode_varint(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

/// Read the length prefix of the frame starting at `data[pos..]`
///
/// Returns the byte range of the frame body inside `data`.
pub(crate) fn read_frame(data: &[u8], pos: usize) -> Result<std::ops::Range<usize>, String> {
    let mut cursor = data.get(pos..).ok_or("frame starts past end of chunk")?;
    let before = cursor.len();
    let length = prost::encoding::decode_varint(&mut cursor)
        .map_err(|e| format!("bad frame length at byte {}: {}", pos, e))?;
    let start = pos + (before - cursor.len());
    let end = usize::try_from(length)
        .ok()
        .and_then(|length| start.checked_add(length))
        .filter(|&end| end <= data.len())
        .ok_or_else(|| {
            format!(
                "frame of {} bytes at byte {} overruns chunk of {} bytes",
                length,
                start,
                data.len()
            )
        })?;
    Ok(start..end)
}

/// Read the row count header at the start of a chunk; returns (rows, header length)
pub(crate) fn read_chunk_header(data: &[u8]) -> Result<(u64, usize), String> {
    let mut cursor = data;
    let rows = prost::encoding::decode_varint(&mut cursor)
        .map_err(|e| format!("bad chunk header: {}", e))?;
    Ok((rows, data.len() - cursor.len()))
}

/// Decode one frame body as a value of type `type_id`
pub(crate) fn decode_frame(types: &TypeTree, type_id: usize, frame: &[u8]) -> Result<Value, String> {
    let mut cursor = frame;
    let value = decode_value(types, type_id, &mut cursor)?;
    if cursor.has_remaining() {
        return Err(format!("{} trailing bytes after value", cursor.remaining()));
    }
    Ok(value)
}

fn decode_value(types: &TypeTree, type_id: usize, buf: &mut &[u8]) -> Result<Value, String> {
    let node = types
        .get(type_id)
        .ok_or_else(|| format!("unknown type id {}", type_id))?;
    match take_u8(buf)? {
        NULL_MARKER => return Ok(Value::Null),
        PRESENT_MARKER => {}
        other => return Err(format!("invalid presence marker {}", other)),
    }

    let value = match node.kind() {
        TypeKind::Boolean => match take_u8(buf)? {
            0 => Value::Boolean(false),
            1 => Value::Boolean(true),
            other => return Err(format!("invalid boolean byte {}", other)),
        },
        TypeKind::Byte => Value::Byte(narrow(take_signed(buf)?, "tinyint")?),
        TypeKind::Short => Value::Short(narrow(take_signed(buf)?, "smallint")?),
        TypeKind::Int => Value::Int(narrow(take_signed(buf)?, "int")?),
        TypeKind::Long => Value::Long(take_signed(buf)?),
        TypeKind::Float => {
            ensure_remaining(buf, 4)?;
            Value::Float(buf.get_f32_le())
        }
        TypeKind::Double => {
            ensure_remaining(buf, 8)?;
            Value::Double(buf.get_f64_le())
        }
        TypeKind::String => {
            let bytes = take_bytes(buf)?;
            let s = std::str::from_utf8(bytes).map_err(|e| format!("invalid UTF-8: {}", e))?;
            Value::String(s.to_string())
        }
        TypeKind::Binary => Value::Binary(take_bytes(buf)?.to_vec()),
        TypeKind::Timestamp => Value::Timestamp(take_signed(buf)?),
        TypeKind::Date => Value::Date(narrow(take_signed(buf)?, "date")?),
        TypeKind::List => {
            let count = take_count(buf)?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_value(types, node.children()[0], buf)?);
            }
            Value::List(items)
        }
        TypeKind::Map => {
            let count = take_count(buf)?;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let key = decode_value(types, node.children()[0], buf)?;
                let item = decode_value(types, node.children()[1], buf)?;
                entries.push((key, item));
            }
            Value::Map(entries)
        }
        TypeKind::Struct => {
            let mut fields = Vec::with_capacity(node.children().len());
            for &child in node.children() {
                fields.push(decode_value(types, child, buf)?);
            }
            Value::Struct(fields)
        }
    };
    Ok(value)
}

fn ensure_remaining(buf: &&[u8], needed: usize) -> Result<(), String> {
    if buf.remaining() < needed {
        return Err(format!(
            "value needs {} bytes, {} left",
            needed,
            buf.remaining()
        ));
    }
    Ok(())
}

fn take_u8(buf: &mut &[u8]) -> Result<u8, String> {
    ensure_remaining(buf, 1)?;
    Ok(buf.get_u8())
}

fn take_signed(buf: &mut &[u8]) -> Result<i64, String> {
    let raw = prost::encoding::decode_varint(buf).map_err(|e| format!("bad varint: {}", e))?;
    Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
}

fn take_count(buf: &mut &[u8]) -> Result<usize, String> {
    let count = prost::encoding::decode_varint(buf).map_err(|e| format!("bad count: {}", e))?;
    // every element takes at least its presence byte
    if count > buf.remaining() as u64 {
        return Err(format!("count {} exceeds remaining {} bytes", count, buf.remaining()));
    }
    Ok(count as usize)
}

fn take_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], String> {
    let length = prost::encoding::decode_varint(buf).map_err(|e| format!("bad length: {}", e))?;
    let length = usize::try_from(length).map_err(|_| format!("length {} too large", length))?;
    ensure_remaining(buf, length)?;
    let (bytes, rest) = buf.split_at(length);
    *buf = rest;
    Ok(bytes)
}

fn narrow<T: TryFrom<i64>>(v: i64, type_name: &str) -> Result<T, String> {
    T::try_from(v).map_err(|_| format!("{} out of range for {}", v, type_name))
}
