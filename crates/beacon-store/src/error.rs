//! Error types for the Beacon document store.

use thiserror::Error;

use crate::codec::CodecError;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
///
/// A missing record is never an error: primitives report absence through
/// empty results or `None`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("rollback failed: {0}")]
    Rollback(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("invalid record key {0:?}: keys must be non-empty")]
    InvalidKey(String),

    #[error("type `{type_name}` has no field named `{field}`")]
    UnknownField { type_name: String, field: String },

    #[error("lookup of `{lookup}` in `{type_name}` resolved {count} records, expected at most one")]
    MultipleResult {
        type_name: String,
        lookup: String,
        count: usize,
    },

    #[error("write attempted through a read-only transaction")]
    ReadOnlyTransaction,
}

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| $crate::error::StoreError::$variant(e.to_string())
    };
}

pub(crate) use map_err;
