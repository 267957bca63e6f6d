//! Error types for the maintenance jobs and the election latch.

use beacon_store::StoreError;
use thiserror::Error;

pub type MaintainResult<T> = Result<T, MaintainError>;

#[derive(Debug, Error)]
pub enum MaintainError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("election key must be non-empty")]
    EmptyKey,

    #[error("no election is tracked under key {0:?}")]
    UnknownKey(String),
}
