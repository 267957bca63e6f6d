//! Store opening options, embeddable in daemon configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How to open a [`StoreHandle`](crate::StoreHandle).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Database file. `None` opens an ephemeral in-memory store.
    pub path: Option<PathBuf>,
    /// Page cache size in bytes. redb's default when unset.
    pub cache_size_bytes: Option<usize>,
}

impl StoreOptions {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            cache_size_bytes: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }
}
