//! Projection-based record filtering.
//!
//! A filtered scan decodes only the fields a predicate needs, tests the
//! predicate, and fully decodes just the records that pass. A predicate
//! only ever sees projected fields, so the projection must list every
//! field the predicate reads.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::bucket::TypeReader;
use crate::codec;
use crate::error::{StoreError, StoreResult};
use crate::schema::Schema;
use crate::value::{FieldKind, FieldValue};

/// Predicate over a projection. `None` in a filter call accepts everything.
pub type Predicate<'p> = &'p dyn Fn(&Projection) -> bool;

/// Field name → decoded value, for the projected fields that are present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    values: HashMap<String, FieldValue>,
}

impl Projection {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_str)
    }

    pub fn bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(FieldValue::as_bool)
    }

    pub fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.get(field).and_then(FieldValue::as_timestamp)
    }

    pub fn i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(FieldValue::as_i64)
    }

    pub fn u64(&self, field: &str) -> Option<u64> {
        self.get(field).and_then(FieldValue::as_u64)
    }

    pub fn map(&self, field: &str) -> Option<&HashMap<String, String>> {
        self.get(field).and_then(FieldValue::as_map)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_inner(self) -> HashMap<String, FieldValue> {
        self.values
    }
}

impl FromIterator<(String, FieldValue)> for Projection {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Check that every projected field exists in the schema.
pub(crate) fn check_projection<T>(
    type_name: &str,
    schema: &Schema<T>,
    fields: &[&str],
) -> StoreResult<()> {
    for field in fields {
        if schema.field(field).is_none() {
            return Err(StoreError::UnknownField {
                type_name: type_name.to_string(),
                field: field.to_string(),
            });
        }
    }
    Ok(())
}

/// Decode only `fields` of one record into a projection.
///
/// Fields with no stored value are left out rather than zero-filled.
pub(crate) fn project<T>(
    reader: &TypeReader<'_>,
    key: &str,
    fields: &[&str],
    schema: &Schema<T>,
) -> StoreResult<Projection> {
    let mut values = HashMap::with_capacity(fields.len());
    for &name in fields {
        let Some(field) = schema.field(name) else {
            continue;
        };
        let value = if field.kind() == FieldKind::Map {
            reader.read_map(key, field.key())?.map(FieldValue::Map)
        } else {
            match reader.read_field(key, field.key())? {
                Some(buf) => Some(codec::decode_value(field.name(), &buf, field.kind())?),
                None => None,
            }
        };
        if let Some(value) = value {
            values.insert(name.to_string(), value);
        }
    }
    Ok(Projection { values })
}

/// Test one record against `predicate` using only the projected fields.
pub(crate) fn match_object<T>(
    reader: &TypeReader<'_>,
    key: &str,
    fields: &[&str],
    schema: &Schema<T>,
    predicate: Option<Predicate<'_>>,
) -> StoreResult<bool> {
    let Some(predicate) = predicate else {
        return Ok(true);
    };
    if fields.is_empty() {
        return Ok(true);
    }
    let projection = project(reader, key, fields, schema)?;
    Ok(predicate(&projection))
}
