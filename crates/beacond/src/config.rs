//! beacond.toml configuration parser.
//!
//! ```toml
//! [store]
//! path = "/var/lib/beacon/beacon.redb"
//!
//! [election]
//! key = "beacon-gc"
//! host = "node-1"
//!
//! [[cleanup]]
//! type_name = "instance"
//! older_than_secs = 3600
//! max_batch = 1000
//! interval_secs = 60
//! ```

use std::path::Path;
use std::time::Duration;

use beacon_maintain::CleanupJob;
use beacon_store::StoreOptions;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub store: StoreOptions,
    pub election: ElectionConfig,
    pub cleanup: Vec<CleanupConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Election key guarding the cleanup jobs.
    pub key: String,
    /// Identity recorded with the election state. Defaults to `$HOSTNAME`.
    pub host: String,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            key: "beacon-gc".to_string(),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupConfig {
    pub type_name: String,
    #[serde(default = "default_older_than_secs")]
    pub older_than_secs: u64,
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_older_than_secs() -> u64 {
    3600
}

fn default_max_batch() -> usize {
    1000
}

fn default_interval_secs() -> u64 {
    60
}

impl CleanupConfig {
    pub fn job(&self) -> CleanupJob {
        CleanupJob::new(
            self.type_name.clone(),
            Duration::from_secs(self.older_than_secs),
            self.max_batch,
        )
    }

    /// Interval between passes, never shorter than one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        if config.election.key.is_empty() {
            anyhow::bail!("election.key must not be empty");
        }
        if let Some(job) = config.cleanup.iter().find(|c| c.type_name.is_empty()) {
            anyhow::bail!("cleanup job with empty type_name: {job:?}");
        }
        Ok(config)
    }
}
