//! Type-tagged binary encoding of scalar field values.
//!
//! Every stored scalar is a one-byte [`Tag`] followed by a tag-specific
//! payload:
//!
//! | tag                 | payload                                        |
//! |---------------------|------------------------------------------------|
//! | `String`            | raw UTF-8, no length prefix                    |
//! | `Bool`              | one byte, `0` or `1`                           |
//! | `Timestamp`         | 8-byte little-endian signed nanos since epoch  |
//! | `Message`           | protobuf wire bytes of the message             |
//! | `Int*` / `Uint*`    | 8-byte little-endian, whatever the width       |
//!
//! Decoders check the tag against the kind the caller expects and fail
//! with [`CodecError::TypeMismatch`] when they disagree. An empty buffer
//! decodes to the zero value of the expected kind.
//!
//! Integers are widened to 8 bytes on write and narrowed with a plain `as`
//! cast on read. The cast does not check for overflow: a value written
//! through a wider kind under the same tag is silently truncated.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::value::{FieldKind, FieldValue};

/// One-byte discriminator prefixed to every encoded scalar.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Unknown = 0,
    String = 1,
    Bool = 2,
    Timestamp = 3,
    Message = 4,
    Int8 = 5,
    Int16 = 6,
    Int32 = 7,
    Int64 = 8,
    Uint8 = 9,
    Uint16 = 10,
    Uint32 = 11,
    Uint64 = 12,
}

impl Tag {
    pub fn from_byte(b: u8) -> Tag {
        match b {
            1 => Tag::String,
            2 => Tag::Bool,
            3 => Tag::Timestamp,
            4 => Tag::Message,
            5 => Tag::Int8,
            6 => Tag::Int16,
            7 => Tag::Int32,
            8 => Tag::Int64,
            9 => Tag::Uint8,
            10 => Tag::Uint16,
            11 => Tag::Uint32,
            12 => Tag::Uint64,
            _ => Tag::Unknown,
        }
    }

    /// Tag written for a field of the given declared kind.
    ///
    /// Maps are not tagged values and return `None`.
    pub fn for_kind(kind: FieldKind) -> Option<Tag> {
        let tag = match kind {
            FieldKind::String => Tag::String,
            FieldKind::Bool => Tag::Bool,
            FieldKind::Timestamp => Tag::Timestamp,
            FieldKind::Message => Tag::Message,
            FieldKind::I8 => Tag::Int8,
            FieldKind::I16 => Tag::Int16,
            FieldKind::I32 => Tag::Int32,
            FieldKind::I64 => Tag::Int64,
            FieldKind::U8 => Tag::Uint8,
            FieldKind::U16 => Tag::Uint16,
            FieldKind::U32 => Tag::Uint32,
            FieldKind::U64 => Tag::Uint64,
            FieldKind::Map => return None,
        };
        Some(tag)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Errors raised while encoding or decoding a field buffer.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("field `{field}`: expected {expected} value, found tag byte {found}")]
    TypeMismatch {
        field: String,
        expected: Tag,
        found: u8,
    },

    #[error("field `{field}`: {tag} payload has invalid length {len}")]
    Malformed { field: String, tag: Tag, len: usize },

    #[error("field `{field}`: value is not valid UTF-8")]
    InvalidUtf8 { field: String },

    #[error("field `{field}`: timestamp does not fit in 64-bit nanoseconds")]
    TimestampOutOfRange { field: String },

    #[error("field `{field}`: protobuf decode failed: {source}")]
    Message {
        field: String,
        #[source]
        source: prost::DecodeError,
    },

    #[error("field `{field}`: {kind} values are not tagged scalars")]
    NotScalar { field: String, kind: FieldKind },

    #[error("field `{field}`: declared {expected}, got {found} value")]
    KindMismatch {
        field: String,
        expected: FieldKind,
        found: FieldKind,
    },
}

// ── Encoding ───────────────────────────────────────────────────────

fn tagged(tag: Tag, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 1);
    buf.push(tag as u8);
    buf.extend_from_slice(payload);
    buf
}

pub fn encode_string(v: &str) -> Vec<u8> {
    tagged(Tag::String, v.as_bytes())
}

pub fn encode_bool(v: bool) -> Vec<u8> {
    tagged(Tag::Bool, &[u8::from(v)])
}

pub fn encode_timestamp(field: &str, v: &DateTime<Utc>) -> Result<Vec<u8>, CodecError> {
    let nanos = v
        .timestamp_nanos_opt()
        .ok_or_else(|| CodecError::TimestampOutOfRange {
            field: field.to_string(),
        })?;
    Ok(tagged(Tag::Timestamp, &nanos.to_le_bytes()))
}

/// Encode a signed integer under `tag`, always as 8 bytes.
pub fn encode_int(tag: Tag, v: i64) -> Vec<u8> {
    tagged(tag, &v.to_le_bytes())
}

/// Encode an unsigned integer under `tag`, always as 8 bytes.
pub fn encode_uint(tag: Tag, v: u64) -> Vec<u8> {
    tagged(tag, &v.to_le_bytes())
}

/// Encode an already-marshalled protobuf payload.
pub fn encode_message_bytes(payload: &[u8]) -> Vec<u8> {
    tagged(Tag::Message, payload)
}

pub fn encode_message<M: prost::Message>(msg: &M) -> Vec<u8> {
    tagged(Tag::Message, &msg.encode_to_vec())
}

/// Encode any scalar [`FieldValue`], choosing the tag from its runtime kind.
pub fn encode_value(field: &str, value: &FieldValue) -> Result<Vec<u8>, CodecError> {
    let buf = match value {
        FieldValue::String(v) => encode_string(v),
        FieldValue::Bool(v) => encode_bool(*v),
        FieldValue::Timestamp(v) => encode_timestamp(field, v)?,
        FieldValue::Message(v) => encode_message_bytes(v),
        FieldValue::I8(v) => encode_int(Tag::Int8, (*v).into()),
        FieldValue::I16(v) => encode_int(Tag::Int16, (*v).into()),
        FieldValue::I32(v) => encode_int(Tag::Int32, (*v).into()),
        FieldValue::I64(v) => encode_int(Tag::Int64, *v),
        FieldValue::U8(v) => encode_uint(Tag::Uint8, (*v).into()),
        FieldValue::U16(v) => encode_uint(Tag::Uint16, (*v).into()),
        FieldValue::U32(v) => encode_uint(Tag::Uint32, (*v).into()),
        FieldValue::U64(v) => encode_uint(Tag::Uint64, *v),
        FieldValue::Map(_) => {
            return Err(CodecError::NotScalar {
                field: field.to_string(),
                kind: FieldKind::Map,
            })
        }
    };
    Ok(buf)
}

// ── Decoding ───────────────────────────────────────────────────────

/// Strip and check the tag. `None` means the buffer was empty.
fn payload<'a>(field: &str, buf: &'a [u8], expected: Tag) -> Result<Option<&'a [u8]>, CodecError> {
    let Some((&tag, rest)) = buf.split_first() else {
        return Ok(None);
    };
    if tag != expected as u8 {
        return Err(CodecError::TypeMismatch {
            field: field.to_string(),
            expected,
            found: tag,
        });
    }
    Ok(Some(rest))
}

fn word(field: &str, tag: Tag, payload: &[u8]) -> Result<[u8; 8], CodecError> {
    payload.try_into().map_err(|_| CodecError::Malformed {
        field: field.to_string(),
        tag,
        len: payload.len(),
    })
}

pub fn decode_string(field: &str, buf: &[u8]) -> Result<String, CodecError> {
    match payload(field, buf, Tag::String)? {
        None => Ok(String::new()),
        Some(bytes) => String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 {
            field: field.to_string(),
        }),
    }
}

pub fn decode_bool(field: &str, buf: &[u8]) -> Result<bool, CodecError> {
    match payload(field, buf, Tag::Bool)? {
        None => Ok(false),
        Some([b]) => Ok(*b != 0),
        Some(other) => Err(CodecError::Malformed {
            field: field.to_string(),
            tag: Tag::Bool,
            len: other.len(),
        }),
    }
}

pub fn decode_timestamp(field: &str, buf: &[u8]) -> Result<DateTime<Utc>, CodecError> {
    match payload(field, buf, Tag::Timestamp)? {
        None => Ok(DateTime::<Utc>::default()),
        Some(bytes) => {
            let nanos = i64::from_le_bytes(word(field, Tag::Timestamp, bytes)?);
            Ok(DateTime::<Utc>::from_timestamp_nanos(nanos))
        }
    }
}

/// Decode the 8-byte signed payload stored under `tag`.
pub fn decode_int(field: &str, buf: &[u8], tag: Tag) -> Result<i64, CodecError> {
    match payload(field, buf, tag)? {
        None => Ok(0),
        Some(bytes) => Ok(i64::from_le_bytes(word(field, tag, bytes)?)),
    }
}

/// Decode the 8-byte unsigned payload stored under `tag`.
pub fn decode_uint(field: &str, buf: &[u8], tag: Tag) -> Result<u64, CodecError> {
    match payload(field, buf, tag)? {
        None => Ok(0),
        Some(bytes) => Ok(u64::from_le_bytes(word(field, tag, bytes)?)),
    }
}

/// Strip the message tag and return the raw protobuf payload.
pub fn decode_message_bytes(field: &str, buf: &[u8]) -> Result<Vec<u8>, CodecError> {
    Ok(payload(field, buf, Tag::Message)?
        .map(<[u8]>::to_vec)
        .unwrap_or_default())
}

/// Unmarshal a tagged protobuf message. An empty buffer yields `None`.
pub fn decode_message<M: prost::Message + Default>(
    field: &str,
    buf: &[u8],
) -> Result<Option<M>, CodecError> {
    match payload(field, buf, Tag::Message)? {
        None => Ok(None),
        Some(bytes) => M::decode(bytes)
            .map(Some)
            .map_err(|source| CodecError::Message {
                field: field.to_string(),
                source,
            }),
    }
}

/// Decode `buf` as the declared `kind`, narrowing integers to its width.
pub fn decode_value(field: &str, buf: &[u8], kind: FieldKind) -> Result<FieldValue, CodecError> {
    let value = match kind {
        FieldKind::String => FieldValue::String(decode_string(field, buf)?),
        FieldKind::Bool => FieldValue::Bool(decode_bool(field, buf)?),
        FieldKind::Timestamp => FieldValue::Timestamp(decode_timestamp(field, buf)?),
        FieldKind::Message => FieldValue::Message(decode_message_bytes(field, buf)?),
        FieldKind::I8 => FieldValue::I8(decode_int(field, buf, Tag::Int8)? as i8),
        FieldKind::I16 => FieldValue::I16(decode_int(field, buf, Tag::Int16)? as i16),
        FieldKind::I32 => FieldValue::I32(decode_int(field, buf, Tag::Int32)? as i32),
        FieldKind::I64 => FieldValue::I64(decode_int(field, buf, Tag::Int64)?),
        FieldKind::U8 => FieldValue::U8(decode_uint(field, buf, Tag::Uint8)? as u8),
        FieldKind::U16 => FieldValue::U16(decode_uint(field, buf, Tag::Uint16)? as u16),
        FieldKind::U32 => FieldValue::U32(decode_uint(field, buf, Tag::Uint32)? as u32),
        FieldKind::U64 => FieldValue::U64(decode_uint(field, buf, Tag::Uint64)?),
        FieldKind::Map => {
            return Err(CodecError::NotScalar {
                field: field.to_string(),
                kind,
            })
        }
    };
    Ok(value)
}
