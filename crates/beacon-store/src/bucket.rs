//! Container layout over redb tables.
//!
//! Each record type gets one redb table (the type container), named after
//! the type and created by the first write that touches it. Rows are keyed
//! by `(record_key, slot, field_key, map_key)`:
//!
//! | slot             | row                                        | value          |
//! |------------------|--------------------------------------------|----------------|
//! | `SLOT_RECORD`    | `(key, 0, "", "")` record container marker | empty          |
//! | `SLOT_FIELD`     | `(key, 1, field, "")` scalar field         | tagged buffer  |
//! | `SLOT_MAP`       | `(key, 2, field, "")` map container marker | empty          |
//! | `SLOT_MAP_ENTRY` | `(key, 3, field, map_key)` map entry       | raw UTF-8      |
//!
//! Tuple keys compare element by element, so every row of a record sits in
//! the contiguous range `(key, 0, "", "")..(key, 4, "", "")`.

use std::collections::HashMap;

use redb::{ReadOnlyTable, ReadableTable, Table, TableDefinition};

use crate::codec::CodecError;
use crate::error::{map_err, StoreResult};
use crate::schema::RecordImage;

pub(crate) type RowKey = (&'static str, u8, &'static str, &'static str);
pub(crate) type RowValue = &'static [u8];

type OwnedRow = (String, u8, String, String);

pub(crate) const SLOT_RECORD: u8 = 0;
pub(crate) const SLOT_FIELD: u8 = 1;
pub(crate) const SLOT_MAP: u8 = 2;
pub(crate) const SLOT_MAP_ENTRY: u8 = 3;
const SLOT_END: u8 = 4;

const EMPTY: &[u8] = &[];

/// Table definition for a type container.
pub(crate) fn type_table(type_name: &str) -> TableDefinition<'_, RowKey, RowValue> {
    TableDefinition::new(type_name)
}

fn map_value(field: &str, bytes: &[u8]) -> StoreResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| {
        CodecError::InvalidUtf8 {
            field: field.to_string(),
        }
        .into()
    })
}

// ── Reads (any readable table) ─────────────────────────────────────

fn record_keys<T: ReadableTable<RowKey, RowValue>>(table: &T) -> StoreResult<Vec<String>> {
    let mut keys = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (row, _) = entry.map_err(map_err!(Read))?;
        let (key, slot, _, _) = row.value();
        if slot == SLOT_RECORD {
            keys.push(key.to_string());
        }
    }
    Ok(keys)
}

pub(crate) fn record_exists<T: ReadableTable<RowKey, RowValue>>(table: &T, key: &str) -> StoreResult<bool> {
    Ok(table
        .get((key, SLOT_RECORD, "", ""))
        .map_err(map_err!(Read))?
        .is_some())
}

fn read_record<T: ReadableTable<RowKey, RowValue>>(
    table: &T,
    key: &str,
) -> StoreResult<Option<RecordImage>> {
    let mut found = false;
    let mut image = RecordImage::default();
    let rows = table
        .range((key, SLOT_RECORD, "", "")..(key, SLOT_END, "", ""))
        .map_err(map_err!(Read))?;
    for entry in rows {
        let (row, value) = entry.map_err(map_err!(Read))?;
        let (_, slot, field, map_key) = row.value();
        match slot {
            SLOT_RECORD => found = true,
            SLOT_FIELD => {
                image
                    .scalars
                    .insert(field.to_string(), value.value().to_vec());
            }
            SLOT_MAP => {
                image.maps.entry(field.to_string()).or_default();
            }
            SLOT_MAP_ENTRY => {
                let v = map_value(field, value.value())?;
                image
                    .maps
                    .entry(field.to_string())
                    .or_default()
                    .insert(map_key.to_string(), v);
            }
            _ => {}
        }
    }
    Ok(found.then_some(image))
}

fn read_field<T: ReadableTable<RowKey, RowValue>>(
    table: &T,
    key: &str,
    field: &str,
) -> StoreResult<Option<Vec<u8>>> {
    Ok(table
        .get((key, SLOT_FIELD, field, ""))
        .map_err(map_err!(Read))?
        .map(|guard| guard.value().to_vec()))
}

fn read_map<T: ReadableTable<RowKey, RowValue>>(
    table: &T,
    key: &str,
    field: &str,
) -> StoreResult<Option<HashMap<String, String>>> {
    if table
        .get((key, SLOT_MAP, field, ""))
        .map_err(map_err!(Read))?
        .is_none()
    {
        return Ok(None);
    }
    let mut map = HashMap::new();
    let rows = table
        .range((key, SLOT_MAP_ENTRY, field, "")..(key, SLOT_END, "", ""))
        .map_err(map_err!(Read))?;
    for entry in rows {
        let (row, value) = entry.map_err(map_err!(Read))?;
        let (_, _, row_field, map_key) = row.value();
        if row_field != field {
            break;
        }
        map.insert(map_key.to_string(), map_value(field, value.value())?);
    }
    Ok(Some(map))
}

/// Read access to one type container, through either transaction kind.
pub(crate) enum TypeReader<'txn> {
    Snapshot(ReadOnlyTable<RowKey, RowValue>),
    Writer(Table<'txn, RowKey, RowValue>),
    /// The type container was never created; reads see it as empty.
    Missing,
}

macro_rules! dispatch {
    ($self:ident, $table:ident => $body:expr, missing => $missing:expr) => {
        match $self {
            TypeReader::Snapshot($table) => $body,
            TypeReader::Writer($table) => $body,
            TypeReader::Missing => $missing,
        }
    };
}

impl TypeReader<'_> {
    /// Every record key in the container, in key order.
    pub(crate) fn record_keys(&self) -> StoreResult<Vec<String>> {
        dispatch!(self, t => record_keys(t), missing => Ok(Vec::new()))
    }

    pub(crate) fn record_exists(&self, key: &str) -> StoreResult<bool> {
        dispatch!(self, t => record_exists(t, key), missing => Ok(false))
    }

    /// The whole record container, or `None` when it does not exist.
    pub(crate) fn read_record(&self, key: &str) -> StoreResult<Option<RecordImage>> {
        dispatch!(self, t => read_record(t, key), missing => Ok(None))
    }

    /// One scalar field's tagged buffer.
    pub(crate) fn read_field(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        dispatch!(self, t => read_field(t, key, field), missing => Ok(None))
    }

    /// One map field's child container.
    pub(crate) fn read_map(
        &self,
        key: &str,
        field: &str,
    ) -> StoreResult<Option<HashMap<String, String>>> {
        dispatch!(self, t => read_map(t, key, field), missing => Ok(None))
    }
}

// ── Writes ─────────────────────────────────────────────────────────

type WriteTable<'txn> = Table<'txn, RowKey, RowValue>;

fn owned_rows<'a>(
    table: &WriteTable<'_>,
    from: (&'a str, u8, &'a str, &'a str),
    to: (&'a str, u8, &'a str, &'a str),
    only_field: Option<&str>,
) -> StoreResult<Vec<OwnedRow>> {
    let mut rows = Vec::new();
    for entry in table.range(from..to).map_err(map_err!(Read))? {
        let (row, _) = entry.map_err(map_err!(Read))?;
        let (key, slot, field, map_key) = row.value();
        if only_field.is_some_and(|f| f != field) {
            break;
        }
        rows.push((key.to_string(), slot, field.to_string(), map_key.to_string()));
    }
    Ok(rows)
}

fn remove_rows(table: &mut WriteTable<'_>, rows: &[OwnedRow]) -> StoreResult<()> {
    for (key, slot, field, map_key) in rows {
        table
            .remove((key.as_str(), *slot, field.as_str(), map_key.as_str()))
            .map_err(map_err!(Write))?;
    }
    Ok(())
}

/// Remove a record container with all its fields and child containers.
///
/// Returns whether anything was removed.
pub(crate) fn drop_record(table: &mut WriteTable<'_>, key: &str) -> StoreResult<bool> {
    let rows = owned_rows(
        table,
        (key, SLOT_RECORD, "", ""),
        (key, SLOT_END, "", ""),
        None,
    )?;
    remove_rows(table, &rows)?;
    Ok(!rows.is_empty())
}

pub(crate) fn create_record(table: &mut WriteTable<'_>, key: &str) -> StoreResult<()> {
    table
        .insert((key, SLOT_RECORD, "", ""), EMPTY)
        .map_err(map_err!(Write))?;
    Ok(())
}

pub(crate) fn put_field(
    table: &mut WriteTable<'_>,
    key: &str,
    field: &str,
    buf: &[u8],
) -> StoreResult<()> {
    table
        .insert((key, SLOT_FIELD, field, ""), buf)
        .map_err(map_err!(Write))?;
    Ok(())
}

/// Drop a map field's child container and recreate it with `map`.
pub(crate) fn replace_map(
    table: &mut WriteTable<'_>,
    key: &str,
    field: &str,
    map: &HashMap<String, String>,
) -> StoreResult<()> {
    let mut rows = owned_rows(
        table,
        (key, SLOT_MAP_ENTRY, field, ""),
        (key, SLOT_END, "", ""),
        Some(field),
    )?;
    rows.push((key.to_string(), SLOT_MAP, field.to_string(), String::new()));
    remove_rows(table, &rows)?;

    table
        .insert((key, SLOT_MAP, field, ""), EMPTY)
        .map_err(map_err!(Write))?;
    for (map_key, value) in map {
        table
            .insert((key, SLOT_MAP_ENTRY, field, map_key.as_str()), value.as_bytes())
            .map_err(map_err!(Write))?;
    }
    Ok(())
}

/// Write every scalar and map of `image` into an existing record container.
pub(crate) fn write_image(
    table: &mut WriteTable<'_>,
    key: &str,
    image: &RecordImage,
) -> StoreResult<()> {
    for (field, buf) in &image.scalars {
        put_field(table, key, field, buf)?;
    }
    for (field, map) in &image.maps {
        replace_map(table, key, field, map)?;
    }
    Ok(())
}
