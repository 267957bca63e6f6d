//! Record schemas — explicit field descriptor tables per persisted type.
//!
//! A persisted type implements [`Record`] and lists its fields once:
//!
//! ```
//! use std::collections::HashMap;
//! use beacon_store::{Record, Schema};
//!
//! #[derive(Default)]
//! struct Namespace {
//!     name: String,
//!     owners: String,
//!     valid: bool,
//!     labels: HashMap<String, String>,
//! }
//!
//! impl Record for Namespace {
//!     fn schema() -> Schema<Self> {
//!         Schema::<Self>::new()
//!             .string("Name", |r| &r.name, |r, v| r.name = v)
//!             .string("Owners", |r| &r.owners, |r, v| r.owners = v)
//!             .bool("Valid", |r| r.valid, |r, v| r.valid = v)
//!             .map("Labels", |r| &r.labels, |r, v| r.labels = v)
//!     }
//! }
//! ```
//!
//! The storage key of a field is its name lower-cased (`"ModifyTime"` is
//! stored under `"modifytime"`). Two names that differ only in case collide.
//!
//! Serialization is split in two: [`encode_record`] turns a value into a
//! [`RecordImage`] without touching storage, and the bucket layer writes
//! that image. Map fields travel in the image as whole maps and are written
//! as child containers.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::codec::{self, CodecError};
use crate::value::{FieldKind, FieldValue};

/// Conventional validity flag. A record whose flag is stored as `false` is
/// logically deleted; a record without the flag counts as valid.
pub const FIELD_VALID: &str = "Valid";

/// Conventional last-modification timestamp, touched on soft delete.
pub const FIELD_MODIFY_TIME: &str = "ModifyTime";

/// A type that can be persisted as a record.
///
/// `Default` supplies the zero-value template that decoding starts from.
pub trait Record: Default + 'static {
    fn schema() -> Schema<Self>;
}

type Getter<T> = Box<dyn Fn(&T) -> Option<FieldValue> + Send + Sync>;
type Setter<T> = Box<dyn Fn(&mut T, FieldValue) -> Result<(), CodecError> + Send + Sync>;

/// One persisted field of `T`.
pub struct FieldDescriptor<T> {
    name: &'static str,
    key: String,
    kind: FieldKind,
    get: Getter<T>,
    set: Setter<T>,
}

impl<T> FieldDescriptor<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Storage key: the field name lower-cased.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Read the field from `record`. `None` for an absent message.
    pub fn get(&self, record: &T) -> Option<FieldValue> {
        (self.get)(record)
    }

    /// Assign a decoded value to the field.
    pub fn set(&self, record: &mut T, value: FieldValue) -> Result<(), CodecError> {
        (self.set)(record, value)
    }
}

/// Storage key for a field name.
pub fn field_key(name: &str) -> String {
    name.to_lowercase()
}

fn mismatch(field: &str, expected: FieldKind, found: &FieldValue) -> CodecError {
    CodecError::KindMismatch {
        field: field.to_string(),
        expected,
        found: found.kind(),
    }
}

/// Ordered field descriptor table for `T`.
pub struct Schema<T> {
    fields: Vec<FieldDescriptor<T>>,
}

impl<T: 'static> Default for Schema<T> {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! scalar_field {
    ($($method:ident => $ty:ty, $variant:ident;)*) => {
        $(
            #[doc = concat!("Register a `", stringify!($ty), "` field.")]
            pub fn $method(self, name: &'static str, get: fn(&T) -> $ty, set: fn(&mut T, $ty)) -> Self {
                self.push(
                    name,
                    FieldKind::$variant,
                    Box::new(move |r| Some(FieldValue::$variant(get(r)))),
                    Box::new(move |r, v| match v {
                        FieldValue::$variant(x) => {
                            set(r, x);
                            Ok(())
                        }
                        other => Err(mismatch(name, FieldKind::$variant, &other)),
                    }),
                )
            }
        )*
    };
}

impl<T: 'static> Schema<T> {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    fn push(mut self, name: &'static str, kind: FieldKind, get: Getter<T>, set: Setter<T>) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            key: field_key(name),
            kind,
            get,
            set,
        });
        self
    }

    pub fn string(self, name: &'static str, get: fn(&T) -> &str, set: fn(&mut T, String)) -> Self {
        self.push(
            name,
            FieldKind::String,
            Box::new(move |r| Some(FieldValue::String(get(r).to_string()))),
            Box::new(move |r, v| match v {
                FieldValue::String(s) => {
                    set(r, s);
                    Ok(())
                }
                other => Err(mismatch(name, FieldKind::String, &other)),
            }),
        )
    }

    scalar_field! {
        bool => bool, Bool;
        timestamp => DateTime<Utc>, Timestamp;
        i8 => i8, I8;
        i16 => i16, I16;
        i32 => i32, I32;
        i64 => i64, I64;
        u8 => u8, U8;
        u16 => u16, U16;
        u32 => u32, U32;
        u64 => u64, U64;
    }

    /// Register a `HashMap<String, String>` field, stored as a child container.
    pub fn map(
        self,
        name: &'static str,
        get: fn(&T) -> &HashMap<String, String>,
        set: fn(&mut T, HashMap<String, String>),
    ) -> Self {
        self.push(
            name,
            FieldKind::Map,
            Box::new(move |r| Some(FieldValue::Map(get(r).clone()))),
            Box::new(move |r, v| match v {
                FieldValue::Map(m) => {
                    set(r, m);
                    Ok(())
                }
                other => Err(mismatch(name, FieldKind::Map, &other)),
            }),
        )
    }

    /// Register an optional protobuf message field.
    ///
    /// `None` is not written at all; reading an absent field leaves it `None`.
    pub fn message<M>(self, name: &'static str, get: fn(&T) -> Option<&M>, set: fn(&mut T, Option<M>)) -> Self
    where
        M: prost::Message + Default + 'static,
    {
        self.push(
            name,
            FieldKind::Message,
            Box::new(move |r| get(r).map(FieldValue::message)),
            Box::new(move |r, v| match v {
                FieldValue::Message(bytes) => {
                    let msg = M::decode(bytes.as_slice()).map_err(|source| CodecError::Message {
                        field: name.to_string(),
                        source,
                    })?;
                    set(r, Some(msg));
                    Ok(())
                }
                other => Err(mismatch(name, FieldKind::Message, &other)),
            }),
        )
    }
}

impl<T> Schema<T> {
    /// Look a field up by its declared name, falling back to its storage key.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor<T>> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| {
                let key = field_key(name);
                self.fields.iter().find(|f| f.key == key)
            })
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor<T>> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// The stored form of one record: tagged scalars plus child-container maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordImage {
    /// Field key → tagged buffer.
    pub scalars: BTreeMap<String, Vec<u8>>,
    /// Field key → map contents, written as a child container.
    pub maps: BTreeMap<String, HashMap<String, String>>,
}

/// Encode every present field of `value`. Pure: storage is not touched.
pub fn encode_record<T>(schema: &Schema<T>, value: &T) -> Result<RecordImage, CodecError> {
    let mut image = RecordImage::default();
    for field in &schema.fields {
        match field.get(value) {
            None => {
                trace!(field = field.name, "absent field not encoded");
            }
            Some(FieldValue::Map(map)) => {
                image.maps.insert(field.key.clone(), map);
            }
            Some(scalar) => {
                let buf = codec::encode_value(field.name, &scalar)?;
                image.scalars.insert(field.key.clone(), buf);
            }
        }
    }
    Ok(image)
}

/// Decode a fresh `T` from a stored image. Missing fields keep their zero value.
pub fn decode_record<T: Record>(schema: &Schema<T>, image: &RecordImage) -> Result<T, CodecError> {
    let mut record = T::default();
    for field in &schema.fields {
        if field.kind == FieldKind::Map {
            if let Some(map) = image.maps.get(&field.key) {
                field.set(&mut record, FieldValue::Map(map.clone()))?;
            }
            continue;
        }
        let Some(buf) = image.scalars.get(&field.key) else {
            continue;
        };
        if field.kind == FieldKind::Message && buf.is_empty() {
            continue;
        }
        let value = codec::decode_value(field.name, buf, field.kind)?;
        field.set(&mut record, value)?;
    }
    Ok(record)
}
