//! beacon-store — embedded document store for Beacon.
//!
//! Backed by [redb](https://docs.rs/redb), provides a small set of generic
//! persistence primitives (save, load, filter, update, delete, count,
//! iterate) over typed records, each with optional caller-managed
//! transactions.
//!
//! # Architecture
//!
//! Every record type lives in its own container (a redb table named after
//! the type). Inside it a record is a container keyed by its record key,
//! holding one tagged buffer per scalar field and one child container per
//! map field.
//!
//! Types describe their persisted fields through an explicit [`Schema`]
//! (no reflection). Field values are encoded by [`codec`] as a one-byte
//! type tag followed by a payload, so a stored value always carries its
//! kind and a mismatched read fails instead of returning garbage.
//!
//! The `StoreHandle` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across threads and async tasks.

pub(crate) mod bucket;
pub mod codec;
pub mod error;
pub mod filter;
pub mod handle;
pub mod options;
pub mod schema;
pub mod txn;
pub mod value;

#[cfg(test)]
mod fixtures;

pub use codec::{CodecError, Tag};
pub use error::{StoreError, StoreResult};
pub use filter::{Predicate, Projection};
pub use handle::StoreHandle;
pub use options::StoreOptions;
pub use schema::{
    decode_record, encode_record, field_key, FieldDescriptor, Record, RecordImage, Schema,
    FIELD_MODIFY_TIME, FIELD_VALID,
};
pub use txn::Transaction;
pub use value::{FieldKind, FieldValue};
