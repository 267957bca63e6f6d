//! StoreHandle — the generic record store primitives over redb.
//!
//! Entity stores name a type (its container), hand over record keys and a
//! [`Record`] type, and call the primitives here. Each primitive accepts an
//! optional caller-managed [`Transaction`]; see [`crate::txn`] for how the
//! two modes behave.
//!
//! Record lifecycle: `save` creates (or fully overwrites) a record,
//! `update` patches named fields in place, a soft delete is an `update` of
//! the validity flag, and only `delete` physically removes the container.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use redb::Database;
use tracing::{debug, warn};

use crate::bucket::{self, type_table};
use crate::codec;
use crate::error::{map_err, StoreError, StoreResult};
use crate::filter::{check_projection, match_object, Predicate};
use crate::options::StoreOptions;
use crate::schema::{decode_record, encode_record, field_key, Record, FIELD_VALID};
use crate::txn::{read_scope, write_scope, Transaction};
use crate::value::{FieldKind, FieldValue};

enum Patch<'v> {
    Scalar(String, Vec<u8>),
    Map(String, &'v HashMap<String, String>),
}

fn check_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Thread-safe record store backed by redb.
#[derive(Clone)]
pub struct StoreHandle {
    db: Arc<Database>,
}

impl StoreHandle {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_with(&StoreOptions::file(path))
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open_with(&StoreOptions::in_memory())
    }

    pub fn open_with(options: &StoreOptions) -> StoreResult<Self> {
        let mut builder = Database::builder();
        if let Some(bytes) = options.cache_size_bytes {
            builder.set_cache_size(bytes);
        }
        let db = match &options.path {
            Some(path) => {
                let db = builder.create(path).map_err(map_err!(Open))?;
                debug!(?path, "store opened");
                db
            }
            None => {
                let backend = redb::backends::InMemoryBackend::new();
                let db = builder
                    .create_with_backend(backend)
                    .map_err(map_err!(Open))?;
                debug!("in-memory store opened");
                db
            }
        };
        Ok(Self { db: Arc::new(db) })
    }

    // ── Transactions ───────────────────────────────────────────────

    /// Begin a caller-managed transaction.
    pub fn start_tx(&self, writable: bool) -> StoreResult<Transaction> {
        Transaction::begin(&self.db, writable)
    }

    /// Run `f` in a fresh transaction: committed if `f` succeeds, rolled
    /// back if it fails.
    pub fn execute<R, E>(
        &self,
        writable: bool,
        f: impl FnOnce(&Transaction) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        let tx = self.start_tx(writable)?;
        match f(&tx) {
            Ok(out) => {
                tx.commit()?;
                Ok(out)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    warn!(error = %rollback, "rollback after failed execute did not complete");
                }
                Err(e)
            }
        }
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Store `value` under `key`, replacing any previous record wholesale.
    ///
    /// When at least one scalar field was written and the type has no
    /// `Valid` field of its own, a `valid = true` marker is added. A value
    /// that encodes to no scalars gets no marker.
    pub fn save<T: Record>(
        &self,
        type_name: &str,
        key: &str,
        value: &T,
        tx: Option<&Transaction>,
    ) -> StoreResult<()> {
        check_key(key)?;
        let image = encode_record(&T::schema(), value)?;
        let valid_key = field_key(FIELD_VALID);

        write_scope(&self.db, tx, |txn| {
            let mut table = txn
                .open_table(type_table(type_name))
                .map_err(map_err!(Table))?;
            bucket::drop_record(&mut table, key)?;
            bucket::create_record(&mut table, key)?;
            bucket::write_image(&mut table, key, &image)?;
            if !image.scalars.is_empty() && !image.scalars.contains_key(&valid_key) {
                bucket::put_field(&mut table, key, &valid_key, &codec::encode_bool(true))?;
            }
            Ok(())
        })?;

        debug!(type_name, key, fields = image.scalars.len(), "record saved");
        Ok(())
    }

    /// Overwrite the named fields of an existing record.
    ///
    /// Each value is encoded by its runtime kind; map values replace the
    /// whole child container. Fields not listed are untouched. Returns
    /// `false` without writing when the record does not exist.
    pub fn update(
        &self,
        type_name: &str,
        key: &str,
        properties: &[(&str, FieldValue)],
        tx: Option<&Transaction>,
    ) -> StoreResult<bool> {
        let mut patches = Vec::with_capacity(properties.len());
        for (name, value) in properties {
            let patch = match value {
                FieldValue::Map(map) => Patch::Map(field_key(name), map),
                scalar => Patch::Scalar(field_key(name), codec::encode_value(name, scalar)?),
            };
            patches.push(patch);
        }

        let existed = write_scope(&self.db, tx, |txn| {
            let mut table = txn
                .open_table(type_table(type_name))
                .map_err(map_err!(Table))?;
            if !bucket::record_exists(&table, key)? {
                return Ok(false);
            }
            for patch in &patches {
                match patch {
                    Patch::Scalar(field, buf) => bucket::put_field(&mut table, key, field, buf)?,
                    Patch::Map(field, map) => bucket::replace_map(&mut table, key, field, map)?,
                }
            }
            Ok(true)
        })?;

        if existed {
            debug!(type_name, key, fields = properties.len(), "record updated");
        } else {
            debug!(type_name, key, "update skipped, record absent");
        }
        Ok(existed)
    }

    /// Physically remove records. Missing keys are skipped.
    ///
    /// Returns the number of records removed.
    pub fn delete(
        &self,
        type_name: &str,
        keys: &[&str],
        tx: Option<&Transaction>,
    ) -> StoreResult<usize> {
        let removed = write_scope(&self.db, tx, |txn| {
            let mut table = txn
                .open_table(type_table(type_name))
                .map_err(map_err!(Table))?;
            let mut removed = 0;
            for key in keys {
                if bucket::drop_record(&mut table, key)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })?;
        debug!(type_name, requested = keys.len(), removed, "records deleted");
        Ok(removed)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Load records by key. Keys with no record are left out of the result.
    pub fn load<T: Record>(
        &self,
        type_name: &str,
        keys: &[&str],
        tx: Option<&Transaction>,
    ) -> StoreResult<HashMap<String, T>> {
        let schema = T::schema();
        read_scope(&self.db, tx, |view| {
            let reader = view.open_type(type_name)?;
            let mut out = HashMap::with_capacity(keys.len());
            for &key in keys {
                if let Some(image) = reader.read_record(key)? {
                    out.insert(key.to_string(), decode_record(&schema, &image)?);
                }
            }
            Ok(out)
        })
    }

    /// Load a single record by key.
    pub fn load_one<T: Record>(
        &self,
        type_name: &str,
        key: &str,
        tx: Option<&Transaction>,
    ) -> StoreResult<Option<T>> {
        let mut found = self.load::<T>(type_name, &[key], tx)?;
        if found.len() > 1 {
            return Err(StoreError::MultipleResult {
                type_name: type_name.to_string(),
                lookup: key.to_string(),
                count: found.len(),
            });
        }
        Ok(found.remove(key))
    }

    /// Scan every record of a type, decode only `fields` to test
    /// `predicate`, and fully decode the records that pass.
    pub fn load_by_filter<T: Record>(
        &self,
        type_name: &str,
        fields: &[&str],
        predicate: Option<Predicate<'_>>,
        tx: Option<&Transaction>,
    ) -> StoreResult<HashMap<String, T>> {
        let schema = T::schema();
        check_projection(type_name, &schema, fields)?;
        read_scope(&self.db, tx, |view| {
            let reader = view.open_type(type_name)?;
            let mut out = HashMap::new();
            for key in reader.record_keys()? {
                if !match_object(&reader, &key, fields, &schema, predicate)? {
                    continue;
                }
                if let Some(image) = reader.read_record(&key)? {
                    let record = decode_record(&schema, &image)?;
                    out.insert(key, record);
                }
            }
            Ok(out)
        })
    }

    /// Filtered lookup expected to match at most one record.
    pub fn load_unique_by_filter<T: Record>(
        &self,
        type_name: &str,
        fields: &[&str],
        predicate: Option<Predicate<'_>>,
        tx: Option<&Transaction>,
    ) -> StoreResult<Option<(String, T)>> {
        let found = self.load_by_filter::<T>(type_name, fields, predicate, tx)?;
        if found.len() > 1 {
            return Err(StoreError::MultipleResult {
                type_name: type_name.to_string(),
                lookup: fields.join(","),
                count: found.len(),
            });
        }
        Ok(found.into_iter().next())
    }

    /// Keys of at most `limit` records passing `predicate`, in key order.
    ///
    /// Only the projected fields are decoded, and the scan stops as soon as
    /// `limit` keys are collected.
    pub fn load_keys_by_filter<T: Record>(
        &self,
        type_name: &str,
        fields: &[&str],
        predicate: Option<Predicate<'_>>,
        limit: usize,
        tx: Option<&Transaction>,
    ) -> StoreResult<Vec<String>> {
        let schema = T::schema();
        check_projection(type_name, &schema, fields)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        read_scope(&self.db, tx, |view| {
            let reader = view.open_type(type_name)?;
            let mut keys = Vec::new();
            for key in reader.record_keys()? {
                if match_object(&reader, &key, fields, &schema, predicate)? {
                    keys.push(key);
                    if keys.len() == limit {
                        break;
                    }
                }
            }
            Ok(keys)
        })
    }

    /// Load every record of a type.
    pub fn load_all<T: Record>(
        &self,
        type_name: &str,
        tx: Option<&Transaction>,
    ) -> StoreResult<HashMap<String, T>> {
        self.load_by_filter(type_name, &[], None, tx)
    }

    /// Count records whose validity flag is not stored as `false`.
    pub fn count(&self, type_name: &str, tx: Option<&Transaction>) -> StoreResult<usize> {
        let valid_key = field_key(FIELD_VALID);
        read_scope(&self.db, tx, |view| {
            let reader = view.open_type(type_name)?;
            let mut count = 0;
            for key in reader.record_keys()? {
                let valid = match reader.read_field(&key, &valid_key)? {
                    Some(buf) => codec::decode_bool(FIELD_VALID, &buf)?,
                    None => true,
                };
                if valid {
                    count += 1;
                }
            }
            Ok(count)
        })
    }

    pub fn exists(&self, type_name: &str, key: &str, tx: Option<&Transaction>) -> StoreResult<bool> {
        read_scope(&self.db, tx, |view| view.open_type(type_name)?.record_exists(key))
    }

    /// Every record key of a type, in key order.
    pub fn list_keys(&self, type_name: &str, tx: Option<&Transaction>) -> StoreResult<Vec<String>> {
        read_scope(&self.db, tx, |view| view.open_type(type_name)?.record_keys())
    }

    /// Stream one decoded field of every record to `callback`.
    ///
    /// Records without a stored value for the field are skipped.
    pub fn iterate<T: Record>(
        &self,
        type_name: &str,
        field: &str,
        tx: Option<&Transaction>,
        mut callback: impl FnMut(&str, FieldValue),
    ) -> StoreResult<()> {
        let schema = T::schema();
        let descriptor = schema.field(field).ok_or_else(|| StoreError::UnknownField {
            type_name: type_name.to_string(),
            field: field.to_string(),
        })?;
        read_scope(&self.db, tx, |view| {
            let reader = view.open_type(type_name)?;
            for key in reader.record_keys()? {
                let value = if descriptor.kind() == FieldKind::Map {
                    reader.read_map(&key, descriptor.key())?.map(FieldValue::Map)
                } else {
                    match reader.read_field(&key, descriptor.key())? {
                        Some(buf) => Some(codec::decode_value(
                            descriptor.name(),
                            &buf,
                            descriptor.kind(),
                        )?),
                        None => None,
                    }
                };
                if let Some(value) = value {
                    callback(&key, value);
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    use chrono::{Duration, Utc};

    use crate::fixtures::{Empty, HealthCheck, Instance, INSTANCE};
    use crate::schema::FIELD_MODIFY_TIME;

    fn store() -> StoreHandle {
        StoreHandle::open_in_memory().unwrap()
    }

    fn only_valid(p: &crate::Projection) -> bool {
        p.bool(FIELD_VALID).unwrap_or(true)
    }

    // ── Save / load ────────────────────────────────────────────────

    #[test]
    fn save_and_load() {
        let store = store();
        let inst = Instance::sample("i1");
        store.save(INSTANCE, "i1", &inst, None).unwrap();

        let loaded = store.load::<Instance>(INSTANCE, &["i1"], None).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["i1"], inst);
    }

    #[test]
    fn load_omits_missing_keys() {
        let store = store();
        store
            .save(INSTANCE, "i1", &Instance::sample("i1"), None)
            .unwrap();

        let loaded = store
            .load::<Instance>(INSTANCE, &["i1", "nope"], None)
            .unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("i1"));
    }

    #[test]
    fn unknown_type_reads_as_empty() {
        let store = store();
        assert!(store.load::<Instance>("never", &["a"], None).unwrap().is_empty());
        assert!(store.load_all::<Instance>("never", None).unwrap().is_empty());
        assert_eq!(store.count("never", None).unwrap(), 0);
        assert!(store.list_keys("never", None).unwrap().is_empty());
    }

    #[test]
    fn save_overwrites_instead_of_merging() {
        let store = store();
        let mut first = Instance::sample("i1");
        first.health_check = Some(HealthCheck {
            kind: "http".into(),
            ttl_secs: 3,
        });
        first.metadata.insert("rack".into(), "r7".into());
        store.save(INSTANCE, "i1", &first, None).unwrap();

        let second = Instance {
            host: "10.0.0.2".into(),
            ..Instance::default()
        };
        store.save(INSTANCE, "i1", &second, None).unwrap();

        let loaded = store.load_one::<Instance>(INSTANCE, "i1", None).unwrap().unwrap();
        assert_eq!(loaded.host, "10.0.0.2");
        assert!(loaded.health_check.is_none());
        assert!(loaded.metadata.is_empty());
    }

    #[test]
    fn save_rejects_empty_key() {
        let store = store();
        let err = store
            .save(INSTANCE, "", &Instance::sample("x"), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[test]
    fn type_containers_are_isolated() {
        let store = store();
        store.save("instance", "k", &Instance::sample("a"), None).unwrap();
        store.save("service", "k", &Instance::sample("b"), None).unwrap();

        let a = store.load_one::<Instance>("instance", "k", None).unwrap().unwrap();
        let b = store.load_one::<Instance>("service", "k", None).unwrap().unwrap();
        assert_eq!(a.id, "a");
        assert_eq!(b.id, "b");
    }

    #[test]
    fn keys_sharing_a_prefix_stay_apart() {
        let store = store();
        store.save(INSTANCE, "ns@svc", &Instance::sample("1"), None).unwrap();
        store.save(INSTANCE, "ns@svc2", &Instance::sample("2"), None).unwrap();
        store.delete(INSTANCE, &["ns@svc"], None).unwrap();

        let left = store.list_keys(INSTANCE, None).unwrap();
        assert_eq!(left, vec!["ns@svc2".to_string()]);
    }

    // ── Update ─────────────────────────────────────────────────────

    #[test]
    fn update_changes_only_named_fields() {
        let store = store();
        let before = Instance::sample("i1");
        store.save(INSTANCE, "i1", &before, None).unwrap();

        let existed = store
            .update(INSTANCE, "i1", &[("Port", FieldValue::U32(9090))], None)
            .unwrap();
        assert!(existed);

        let after = store.load_one::<Instance>(INSTANCE, "i1", None).unwrap().unwrap();
        assert_eq!(after, Instance { port: 9090, ..before });
    }

    #[test]
    fn update_replaces_map_wholesale() {
        let store = store();
        store.save(INSTANCE, "i1", &Instance::sample("i1"), None).unwrap();

        let meta = HashMap::from([("region".to_string(), "eu".to_string())]);
        store
            .update(INSTANCE, "i1", &[("Metadata", FieldValue::Map(meta.clone()))], None)
            .unwrap();

        let after = store.load_one::<Instance>(INSTANCE, "i1", None).unwrap().unwrap();
        assert_eq!(after.metadata, meta);
    }

    #[test]
    fn update_of_missing_record_is_a_noop() {
        let store = store();
        let existed = store
            .update(INSTANCE, "ghost", &[("Port", FieldValue::U32(1))], None)
            .unwrap();
        assert!(!existed);
        assert!(!store.exists(INSTANCE, "ghost", None).unwrap());
    }

    #[test]
    fn update_sets_absent_message() {
        let store = store();
        store.save(INSTANCE, "i1", &Instance::sample("i1"), None).unwrap();
        let check = HealthCheck {
            kind: "heartbeat".into(),
            ttl_secs: 10,
        };
        store
            .update(INSTANCE, "i1", &[("HealthCheck", FieldValue::message(&check))], None)
            .unwrap();

        let after = store.load_one::<Instance>(INSTANCE, "i1", None).unwrap().unwrap();
        assert_eq!(after.health_check, Some(check));
    }

    #[test]
    fn update_with_wrong_kind_surfaces_on_read() {
        let store = store();
        store.save(INSTANCE, "i1", &Instance::sample("i1"), None).unwrap();
        store
            .update(INSTANCE, "i1", &[("Port", FieldValue::String("80".into()))], None)
            .unwrap();

        let err = store.load_one::<Instance>(INSTANCE, "i1", None).unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)));
    }

    // ── Filter ─────────────────────────────────────────────────────

    #[test]
    fn load_by_filter_uses_projection() {
        let store = store();
        for (id, port) in [("a", 80u32), ("b", 8080), ("c", 9090)] {
            let inst = Instance {
                port,
                ..Instance::sample(id)
            };
            store.save(INSTANCE, id, &inst, None).unwrap();
        }

        let high = |p: &crate::Projection| p.u64("Port").is_some_and(|port| port > 1000);
        let found = store
            .load_by_filter::<Instance>(INSTANCE, &["Port"], Some(&high), None)
            .unwrap();
        let mut keys: Vec<_> = found.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["b", "c"]);
        assert_eq!(found["c"].host, "127.0.0.1");
    }

    #[test]
    fn predicate_sees_only_projected_fields() {
        let store = store();
        store.save(INSTANCE, "a", &Instance::sample("a"), None).unwrap();

        let sees_host = |p: &crate::Projection| p.contains("Host");
        let found = store
            .load_by_filter::<Instance>(INSTANCE, &["Port"], Some(&sees_host), None)
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn projection_agrees_with_full_decode() {
        let store = store();
        let mut inst = Instance::sample("a");
        inst.health_check = Some(HealthCheck {
            kind: "tcp".into(),
            ttl_secs: 1,
        });
        store.save(INSTANCE, "a", &inst, None).unwrap();

        let fields = ["Host", "Port", "Priority", "Valid", "ModifyTime", "Metadata", "HealthCheck"];
        let schema = Instance::schema();
        let projected = store
            .execute(false, |tx| {
                let view = tx.view();
                let reader = view.open_type(INSTANCE)?;
                crate::filter::project(&reader, "a", &fields, &schema)
            })
            .unwrap();

        for name in fields {
            let expected = schema.field(name).unwrap().get(&inst).unwrap();
            assert_eq!(projected.get(name), Some(&expected), "field {name}");
        }
    }

    #[test]
    fn key_scan_stops_at_limit() {
        let store = store();
        for id in ["a", "b", "c", "d"] {
            store.save(INSTANCE, id, &Instance::sample(id), None).unwrap();
        }

        let calls = std::cell::Cell::new(0);
        let counting = |_: &crate::Projection| {
            calls.set(calls.get() + 1);
            true
        };
        let keys = store
            .load_keys_by_filter::<Instance>(INSTANCE, &["Valid"], Some(&counting), 2, None)
            .unwrap();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(calls.get(), 2);

        let none = store
            .load_keys_by_filter::<Instance>(INSTANCE, &["Valid"], Some(&counting), 0, None)
            .unwrap();
        assert!(none.is_empty());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn unknown_projection_field_is_rejected() {
        let store = store();
        let any = |_: &crate::Projection| true;
        let err = store
            .load_by_filter::<Instance>(INSTANCE, &["Nope"], Some(&any), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownField { .. }));
    }

    #[test]
    fn unique_filter_reports_collisions() {
        let store = store();
        store.save(INSTANCE, "a", &Instance::sample("a"), None).unwrap();
        store.save(INSTANCE, "b", &Instance::sample("b"), None).unwrap();

        let localhost = |p: &crate::Projection| p.str("Host") == Some("127.0.0.1");
        let err = store
            .load_unique_by_filter::<Instance>(INSTANCE, &["Host"], Some(&localhost), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::MultipleResult { count: 2, .. }));

        let only_a = |p: &crate::Projection| p.str("ID") == Some("a");
        let (key, inst) = store
            .load_unique_by_filter::<Instance>(INSTANCE, &["ID"], Some(&only_a), None)
            .unwrap()
            .unwrap();
        assert_eq!(key, "a");
        assert_eq!(inst.id, "a");
    }

    // ── Count / delete / iterate ───────────────────────────────────

    #[test]
    fn count_skips_soft_deleted_records() {
        let store = store();
        for id in ["a", "b", "c"] {
            store.save(INSTANCE, id, &Instance::sample(id), None).unwrap();
        }
        store
            .update(INSTANCE, "b", &[(FIELD_VALID, FieldValue::Bool(false))], None)
            .unwrap();
        assert_eq!(store.count(INSTANCE, None).unwrap(), 2);
    }

    #[test]
    fn save_marks_records_valid_when_schema_has_no_flag() {
        #[derive(Default)]
        struct Tag {
            name: String,
        }
        impl Record for Tag {
            fn schema() -> crate::Schema<Self> {
                crate::Schema::<Self>::new().string("Name", |r| &r.name, |r, v| r.name = v)
            }
        }

        let store = store();
        store
            .save("tag", "t", &Tag { name: "x".into() }, None)
            .unwrap();
        let mut seen = Vec::new();
        store
            .execute(false, |tx| {
                let reader = tx.view().open_type("tag")?;
                seen.push(reader.read_field("t", "valid")?);
                Ok::<_, StoreError>(())
            })
            .unwrap();
        assert_eq!(seen, vec![Some(codec::encode_bool(true))]);
    }

    #[test]
    fn empty_record_gets_no_marker_but_still_counts() {
        let store = store();
        store.save("empty", "e", &Empty, None).unwrap();

        assert!(store.exists("empty", "e", None).unwrap());
        assert_eq!(store.count("empty", None).unwrap(), 1);
        let loaded = store.load_one::<Empty>("empty", "e", None).unwrap();
        assert_eq!(loaded, Some(Empty));
    }

    #[test]
    fn delete_removes_record_and_children() {
        let store = store();
        store.save(INSTANCE, "a", &Instance::sample("a"), None).unwrap();
        store.save(INSTANCE, "b", &Instance::sample("b"), None).unwrap();

        let removed = store.delete(INSTANCE, &["a", "missing"], None).unwrap();
        assert_eq!(removed, 1);
        assert!(store.load_one::<Instance>(INSTANCE, "a", None).unwrap().is_none());
        assert_eq!(store.list_keys(INSTANCE, None).unwrap(), vec!["b".to_string()]);

        // A recreated record must not inherit the old map entries.
        store.save(INSTANCE, "a", &Instance::default(), None).unwrap();
        let again = store.load_one::<Instance>(INSTANCE, "a", None).unwrap().unwrap();
        assert!(again.metadata.is_empty());
    }

    #[test]
    fn iterate_streams_one_field() {
        let store = store();
        for (id, host) in [("a", "10.0.0.1"), ("b", "10.0.0.2")] {
            let inst = Instance {
                host: host.into(),
                ..Instance::sample(id)
            };
            store.save(INSTANCE, id, &inst, None).unwrap();
        }

        let mut hosts = Vec::new();
        store
            .iterate::<Instance>(INSTANCE, "Host", None, |key, value| {
                hosts.push((key.to_string(), value));
            })
            .unwrap();
        assert_eq!(
            hosts,
            vec![
                ("a".to_string(), FieldValue::String("10.0.0.1".into())),
                ("b".to_string(), FieldValue::String("10.0.0.2".into())),
            ]
        );

        let mut checks = 0;
        store
            .iterate::<Instance>(INSTANCE, "HealthCheck", None, |_, _| checks += 1)
            .unwrap();
        assert_eq!(checks, 0);
    }

    // ── Transactions ───────────────────────────────────────────────

    #[test]
    fn explicit_transaction_rolls_back_both_saves() {
        let store = store();
        let result = store.execute(true, |tx| {
            store.save(INSTANCE, "a", &Instance::sample("a"), Some(tx))?;
            // Second write fails validation.
            store.save(INSTANCE, "", &Instance::sample("b"), Some(tx))?;
            Ok::<_, StoreError>(())
        });
        assert!(matches!(result, Err(StoreError::InvalidKey(_))));
        assert!(store.load_all::<Instance>(INSTANCE, None).unwrap().is_empty());
    }

    #[test]
    fn independent_saves_keep_the_first() {
        let store = store();
        store.save(INSTANCE, "a", &Instance::sample("a"), None).unwrap();
        assert!(store.save(INSTANCE, "", &Instance::sample("b"), None).is_err());
        assert_eq!(store.load_all::<Instance>(INSTANCE, None).unwrap().len(), 1);
    }

    #[test]
    fn explicit_transaction_is_visible_to_itself_before_commit() {
        let store = store();
        let tx = store.start_tx(true).unwrap();
        store.save(INSTANCE, "a", &Instance::sample("a"), Some(&tx)).unwrap();
        assert!(store.exists(INSTANCE, "a", Some(&tx)).unwrap());
        tx.rollback().unwrap();
        assert!(!store.exists(INSTANCE, "a", None).unwrap());

        let tx = store.start_tx(true).unwrap();
        store.save(INSTANCE, "a", &Instance::sample("a"), Some(&tx)).unwrap();
        tx.commit().unwrap();
        assert!(store.exists(INSTANCE, "a", None).unwrap());
    }

    #[test]
    fn read_snapshot_ignores_later_writes() {
        let store = store();
        store.save(INSTANCE, "a", &Instance::sample("a"), None).unwrap();
        let snapshot = store.start_tx(false).unwrap();
        store.save(INSTANCE, "b", &Instance::sample("b"), None).unwrap();

        assert_eq!(store.list_keys(INSTANCE, Some(&snapshot)).unwrap().len(), 1);
        assert_eq!(store.list_keys(INSTANCE, None).unwrap().len(), 2);
    }

    #[test]
    fn read_only_transaction_rejects_writes() {
        let store = store();
        let tx = store.start_tx(false).unwrap();
        assert!(tx.native_read().is_some());
        let err = store
            .save(INSTANCE, "a", &Instance::sample("a"), Some(&tx))
            .unwrap_err();
        assert!(matches!(err, StoreError::ReadOnlyTransaction));
    }

    // ── Concurrency ────────────────────────────────────────────────

    #[test]
    fn concurrent_updates_to_different_fields_both_land() {
        let store = store();
        store.save(INSTANCE, "i1", &Instance::sample("i1"), None).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [("Port", FieldValue::U32(1)), ("Host", FieldValue::from("10.9.9.9"))]
            .into_iter()
            .map(|(field, value)| {
                let store = store.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..50 {
                        store
                            .update(INSTANCE, "i1", &[(field, value.clone())], None)
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let after = store.load_one::<Instance>(INSTANCE, "i1", None).unwrap().unwrap();
        assert_eq!(after.port, 1);
        assert_eq!(after.host, "10.9.9.9");
        assert_eq!(after.weight, 100);
    }

    #[test]
    fn save_after_update_wins_for_every_field() {
        let store = store();
        store.save(INSTANCE, "i1", &Instance::sample("i1"), None).unwrap();
        store
            .update(INSTANCE, "i1", &[("Port", FieldValue::U32(1))], None)
            .unwrap();
        store.save(INSTANCE, "i1", &Instance::sample("i1"), None).unwrap();

        let after = store.load_one::<Instance>(INSTANCE, "i1", None).unwrap().unwrap();
        assert_eq!(after.port, 8080);
    }

    #[test]
    fn racing_update_and_save_leave_a_whole_state() {
        let store = store();
        let saved = Instance::sample("i1");
        store.save(INSTANCE, "i1", &saved, None).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let updater = {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..50 {
                    store
                        .update(
                            INSTANCE,
                            "i1",
                            &[("Port", FieldValue::U32(1)), ("Host", FieldValue::from("10.9.9.9"))],
                            None,
                        )
                        .unwrap();
                }
            })
        };
        let saver = {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            let saved = saved.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..50 {
                    store.save(INSTANCE, "i1", &saved, None).unwrap();
                }
            })
        };
        updater.join().unwrap();
        saver.join().unwrap();

        let after = store.load_one::<Instance>(INSTANCE, "i1", None).unwrap().unwrap();
        let from_update = (after.port, after.host.as_str()) == (1, "10.9.9.9");
        let from_save = (after.port, after.host.as_str()) == (saved.port, saved.host.as_str());
        assert!(from_update || from_save, "mixed state: {after:?}");
        // Fields the update never names always carry the saved value.
        assert_eq!(Instance { port: saved.port, host: saved.host.clone(), ..after }, saved);
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    #[test]
    fn soft_delete_hides_record_from_valid_filter() {
        let store = store();
        store.save(INSTANCE, "i1", &Instance::sample("i1"), None).unwrap();
        store
            .update(
                INSTANCE,
                "i1",
                &[
                    (FIELD_VALID, FieldValue::Bool(false)),
                    (FIELD_MODIFY_TIME, FieldValue::Timestamp(Utc::now() - Duration::seconds(5))),
                ],
                None,
            )
            .unwrap();

        let visible = store
            .load_by_filter::<Instance>(INSTANCE, &[FIELD_VALID], Some(&only_valid), None)
            .unwrap();
        assert!(visible.is_empty());
        // The container itself persists until a physical delete.
        assert!(store.exists(INSTANCE, "i1", None).unwrap());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StoreHandle::open(&db_path).unwrap();
            store.save(INSTANCE, "i1", &Instance::sample("i1"), None).unwrap();
        }

        let store = StoreHandle::open(&db_path).unwrap();
        let inst = store.load_one::<Instance>(INSTANCE, "i1", None).unwrap();
        assert_eq!(inst, Some(Instance::sample("i1")));
    }

    #[test]
    fn open_with_cache_size() {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions {
            path: Some(dir.path().join("cached.redb")),
            cache_size_bytes: Some(4 * 1024 * 1024),
        };
        let store = StoreHandle::open_with(&options).unwrap();
        store.save(INSTANCE, "i1", &Instance::sample("i1"), None).unwrap();
        assert_eq!(store.count(INSTANCE, None).unwrap(), 1);
    }
}
