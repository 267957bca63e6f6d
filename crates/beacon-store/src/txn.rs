//! Explicit and auto-managed transactions.
//!
//! Every store primitive takes an `Option<&Transaction>`:
//!
//! - `Some(tx)`: the primitive runs inside the caller's transaction and
//!   never commits it; the caller decides with [`Transaction::commit`] or
//!   [`Transaction::rollback`]. This is how several primitives compose into
//!   one atomic write.
//! - `None`: the primitive begins its own transaction, commits it on
//!   success and aborts it on error before returning.
//!
//! redb allows one write transaction at a time; beginning a second one
//! blocks until the first is committed or aborted. Read transactions see a
//! consistent snapshot and never block writers.

use redb::{Database, ReadTransaction, ReadableDatabase, TableError, WriteTransaction};
use tracing::{debug, warn};

use crate::bucket::{type_table, TypeReader};
use crate::error::{map_err, StoreError, StoreResult};

enum TxInner {
    Read(ReadTransaction),
    Write(WriteTransaction),
}

/// A caller-managed transaction handle.
///
/// Dropping a write transaction without committing aborts it.
pub struct Transaction {
    inner: TxInner,
}

impl Transaction {
    pub(crate) fn begin(db: &Database, writable: bool) -> StoreResult<Self> {
        let inner = if writable {
            TxInner::Write(db.begin_write().map_err(map_err!(Transaction))?)
        } else {
            TxInner::Read(db.begin_read().map_err(map_err!(Transaction))?)
        };
        Ok(Self { inner })
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.inner, TxInner::Write(_))
    }

    /// Commit a write transaction. Closing a read transaction always succeeds.
    pub fn commit(self) -> StoreResult<()> {
        match self.inner {
            TxInner::Write(txn) => txn.commit().map_err(map_err!(Commit)),
            TxInner::Read(_) => Ok(()),
        }
    }

    /// Discard every change made through this transaction.
    pub fn rollback(self) -> StoreResult<()> {
        match self.inner {
            TxInner::Write(txn) => txn.abort().map_err(map_err!(Rollback)),
            TxInner::Read(_) => Ok(()),
        }
    }

    /// The underlying redb write transaction, if this one is writable.
    pub fn native_write(&self) -> Option<&WriteTransaction> {
        match &self.inner {
            TxInner::Write(txn) => Some(txn),
            TxInner::Read(_) => None,
        }
    }

    /// The underlying redb read transaction, if this one is read-only.
    pub fn native_read(&self) -> Option<&ReadTransaction> {
        match &self.inner {
            TxInner::Read(txn) => Some(txn),
            TxInner::Write(_) => None,
        }
    }

    pub(crate) fn writer(&self) -> StoreResult<&WriteTransaction> {
        self.native_write().ok_or(StoreError::ReadOnlyTransaction)
    }

    pub(crate) fn view(&self) -> TxView<'_> {
        match &self.inner {
            TxInner::Read(txn) => TxView::Read(txn),
            TxInner::Write(txn) => TxView::Write(txn),
        }
    }
}

/// Borrowed view of either transaction kind, for read paths.
#[derive(Clone, Copy)]
pub(crate) enum TxView<'a> {
    Read(&'a ReadTransaction),
    Write(&'a WriteTransaction),
}

impl<'a> TxView<'a> {
    /// Open a type container for reading.
    pub(crate) fn open_type(self, type_name: &str) -> StoreResult<TypeReader<'a>> {
        match self {
            TxView::Read(txn) => match txn.open_table(type_table(type_name)) {
                Ok(table) => Ok(TypeReader::Snapshot(table)),
                Err(TableError::TableDoesNotExist(_)) => Ok(TypeReader::Missing),
                Err(e) => Err(StoreError::Table(e.to_string())),
            },
            TxView::Write(txn) => {
                let table = txn
                    .open_table(type_table(type_name))
                    .map_err(map_err!(Table))?;
                Ok(TypeReader::Writer(table))
            }
        }
    }
}

/// Run `f` in the supplied write transaction, or in a fresh one that is
/// committed on success and aborted on error.
pub(crate) fn write_scope<R>(
    db: &Database,
    tx: Option<&Transaction>,
    f: impl FnOnce(&WriteTransaction) -> StoreResult<R>,
) -> StoreResult<R> {
    if let Some(tx) = tx {
        return f(tx.writer()?);
    }
    let txn = db.begin_write().map_err(map_err!(Transaction))?;
    match f(&txn) {
        Ok(out) => {
            txn.commit().map_err(map_err!(Commit))?;
            Ok(out)
        }
        Err(e) => {
            if let Err(abort) = txn.abort() {
                warn!(error = %abort, "abort after failed write did not complete");
            }
            debug!(error = %e, "auto-managed transaction rolled back");
            Err(e)
        }
    }
}

/// Run `f` against the supplied transaction, or a fresh read snapshot.
pub(crate) fn read_scope<R>(
    db: &Database,
    tx: Option<&Transaction>,
    f: impl FnOnce(TxView<'_>) -> StoreResult<R>,
) -> StoreResult<R> {
    if let Some(tx) = tx {
        return f(tx.view());
    }
    let txn = db.begin_read().map_err(map_err!(Transaction))?;
    f(TxView::Read(&txn))
}
