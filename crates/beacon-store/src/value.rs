//! Field kinds and dynamically typed field values.
//!
//! `FieldKind` is the declared kind of a schema field; `FieldValue` carries
//! a value of one of those kinds through partial updates, projections and
//! field iteration.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// Declared kind of a persisted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    String,
    Bool,
    Timestamp,
    Message,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    /// `HashMap<String, String>`, stored as a child container.
    Map,
}

impl FieldKind {
    /// Whether values of this kind are stored inline as a tagged buffer.
    pub fn is_scalar(self) -> bool {
        !matches!(self, FieldKind::Map)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::String => "string",
            FieldKind::Bool => "bool",
            FieldKind::Timestamp => "timestamp",
            FieldKind::Message => "message",
            FieldKind::I8 => "i8",
            FieldKind::I16 => "i16",
            FieldKind::I32 => "i32",
            FieldKind::I64 => "i64",
            FieldKind::U8 => "u8",
            FieldKind::U16 => "u16",
            FieldKind::U32 => "u32",
            FieldKind::U64 => "u64",
            FieldKind::Map => "map",
        };
        f.write_str(name)
    }
}

/// A single field value of any supported kind.
///
/// `Message` holds the already-marshalled protobuf payload; use
/// [`FieldValue::message`] to build one from a `prost::Message`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Message(Vec<u8>),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Map(HashMap<String, String>),
}

impl FieldValue {
    /// Marshal a protobuf message into a `Message` value.
    pub fn message<M: prost::Message>(msg: &M) -> Self {
        FieldValue::Message(msg.encode_to_vec())
    }

    /// The runtime kind of this value.
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::String(_) => FieldKind::String,
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::Timestamp(_) => FieldKind::Timestamp,
            FieldValue::Message(_) => FieldKind::Message,
            FieldValue::I8(_) => FieldKind::I8,
            FieldValue::I16(_) => FieldKind::I16,
            FieldValue::I32(_) => FieldKind::I32,
            FieldValue::I64(_) => FieldKind::I64,
            FieldValue::U8(_) => FieldKind::U8,
            FieldValue::U16(_) => FieldKind::U16,
            FieldValue::U32(_) => FieldKind::U32,
            FieldValue::U64(_) => FieldKind::U64,
            FieldValue::Map(_) => FieldKind::Map,
        }
    }

    /// The zero value of `kind`, as produced by decoding an empty buffer.
    pub fn zero(kind: FieldKind) -> Self {
        match kind {
            FieldKind::String => FieldValue::String(String::new()),
            FieldKind::Bool => FieldValue::Bool(false),
            FieldKind::Timestamp => FieldValue::Timestamp(DateTime::<Utc>::default()),
            FieldKind::Message => FieldValue::Message(Vec::new()),
            FieldKind::I8 => FieldValue::I8(0),
            FieldKind::I16 => FieldValue::I16(0),
            FieldKind::I32 => FieldValue::I32(0),
            FieldKind::I64 => FieldValue::I64(0),
            FieldKind::U8 => FieldValue::U8(0),
            FieldKind::U16 => FieldValue::U16(0),
            FieldKind::U32 => FieldValue::U32(0),
            FieldKind::U64 => FieldValue::U64(0),
            FieldKind::Map => FieldValue::Map(HashMap::new()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Any signed integer, widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            FieldValue::I8(v) => Some(v.into()),
            FieldValue::I16(v) => Some(v.into()),
            FieldValue::I32(v) => Some(v.into()),
            FieldValue::I64(v) => Some(v),
            _ => None,
        }
    }

    /// Any unsigned integer, widened to `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            FieldValue::U8(v) => Some(v.into()),
            FieldValue::U16(v) => Some(v.into()),
            FieldValue::U32(v) => Some(v.into()),
            FieldValue::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, String>> {
        match self {
            FieldValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Unmarshal a `Message` value into `M`.
    pub fn decode_message<M: prost::Message + Default>(&self) -> Option<Result<M, prost::DecodeError>> {
        match self {
            FieldValue::Message(bytes) => Some(M::decode(bytes.as_slice())),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(v)
    }
}

impl From<HashMap<String, String>> for FieldValue {
    fn from(v: HashMap<String, String>) -> Self {
        FieldValue::Map(v)
    }
}

macro_rules! int_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(v: $ty) -> Self {
                    FieldValue::$variant(v)
                }
            }
        )*
    };
}

int_from!(
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
);
