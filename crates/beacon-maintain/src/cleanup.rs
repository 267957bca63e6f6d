//! Soft delete and batched garbage collection of soft-deleted records.
//!
//! A soft delete flips a record's `Valid` flag to false and stamps its
//! `ModifyTime`. The record stays in storage, hidden from readers that
//! filter on validity, until a cleanup pass finds it old enough and
//! physically deletes it.

use std::time::Duration;

use beacon_store::{
    FieldValue, Projection, Record, Schema, StoreHandle, Transaction, FIELD_MODIFY_TIME,
    FIELD_VALID,
};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::error::MaintainResult;

/// The two conventional fields a cleanup pass inspects.
#[derive(Debug, Default)]
struct Tombstone {
    valid: bool,
    modify_time: DateTime<Utc>,
}

impl Record for Tombstone {
    fn schema() -> Schema<Self> {
        Schema::<Self>::new()
            .bool(FIELD_VALID, |r| r.valid, |r, v| r.valid = v)
            .timestamp(FIELD_MODIFY_TIME, |r| r.modify_time, |r, v| r.modify_time = v)
    }
}

/// Mark records as logically deleted.
///
/// Keys without a record are skipped. Returns how many records were marked.
pub fn soft_delete(
    store: &StoreHandle,
    type_name: &str,
    keys: &[&str],
    tx: Option<&Transaction>,
) -> MaintainResult<usize> {
    let patch = [
        (FIELD_VALID, FieldValue::Bool(false)),
        (FIELD_MODIFY_TIME, FieldValue::Timestamp(Utc::now())),
    ];
    let mut marked = 0;
    for key in keys {
        if store.update(type_name, key, &patch, tx)? {
            marked += 1;
        }
    }
    debug!(type_name, requested = keys.len(), marked, "records soft-deleted");
    Ok(marked)
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub type_name: String,
    pub removed: usize,
    /// The batch was full, so more eligible records may remain.
    pub saturated: bool,
}

/// A periodic cleanup pass over one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupJob {
    pub type_name: String,
    /// Minimum age of a soft delete before the record is purged.
    pub older_than: Duration,
    /// Upper bound on records purged per pass.
    pub max_batch: usize,
}

impl CleanupJob {
    pub fn new(type_name: impl Into<String>, older_than: Duration, max_batch: usize) -> Self {
        Self {
            type_name: type_name.into(),
            older_than,
            max_batch,
        }
    }

    /// Run one pass. The scan and the delete share a single write
    /// transaction, so a record revived between them is never purged.
    pub fn run(&self, store: &StoreHandle) -> MaintainResult<CleanupReport> {
        if self.max_batch == 0 {
            return Ok(CleanupReport {
                type_name: self.type_name.clone(),
                removed: 0,
                saturated: false,
            });
        }

        let Some(cutoff) = cutoff(Utc::now(), self.older_than) else {
            debug!(type_name = %self.type_name, "cleanup window reaches before the epoch range, nothing eligible");
            return Ok(CleanupReport {
                type_name: self.type_name.clone(),
                removed: 0,
                saturated: false,
            });
        };

        let (batch, removed) = store.execute(true, |tx| {
            let eligible = |p: &Projection| is_expired(p, cutoff);
            let batch = store.load_keys_by_filter::<Tombstone>(
                &self.type_name,
                &[FIELD_VALID, FIELD_MODIFY_TIME],
                Some(&eligible),
                self.max_batch,
                Some(tx),
            )?;
            let keys: Vec<&str> = batch.iter().map(String::as_str).collect();
            let removed = store.delete(&self.type_name, &keys, Some(tx))?;
            MaintainResult::Ok((batch.len(), removed))
        })?;

        let report = CleanupReport {
            type_name: self.type_name.clone(),
            removed,
            saturated: batch == self.max_batch,
        };
        if removed > 0 {
            info!(
                type_name = %report.type_name,
                removed,
                saturated = report.saturated,
                "purged soft-deleted records"
            );
        } else {
            debug!(type_name = %report.type_name, "no soft-deleted records to purge");
        }
        Ok(report)
    }
}

/// Purge up to `max_batch` records of `type_name` that were soft-deleted at
/// least `older_than` ago. Returns the number removed.
pub fn cleanup(
    store: &StoreHandle,
    type_name: &str,
    older_than: Duration,
    max_batch: usize,
) -> MaintainResult<usize> {
    let report = CleanupJob::new(type_name, older_than, max_batch).run(store)?;
    Ok(report.removed)
}

fn cutoff(now: DateTime<Utc>, older_than: Duration) -> Option<DateTime<Utc>> {
    let window = TimeDelta::from_std(older_than).ok()?;
    now.checked_sub_signed(window)
}

/// Invalid and stamped no later than `cutoff`. A record without a
/// `ModifyTime` is never expired.
fn is_expired(p: &Projection, cutoff: DateTime<Utc>) -> bool {
    let invalid = p.bool(FIELD_VALID) == Some(false);
    invalid && p.timestamp(FIELD_MODIFY_TIME).is_some_and(|t| t <= cutoff)
}
