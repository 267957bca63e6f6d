//! Leader-election latch.
//!
//! A process-local latch: `try_acquire` makes this process the leader for a
//! key and `release` gives it up. There is no lease, no expiry, no fencing
//! token and no coordination with other processes or nodes. Two processes
//! sharing a store file can both believe they lead the same key. Anything
//! that needs real multi-node election must replace this with a consensus
//! protocol (Raft lease, etcd lock).
//!
//! Transitions are recorded in the store under [`ELECTION_TYPE`] for
//! inspection, while the in-memory map stays authoritative for
//! [`LeaderElection::is_leader`]. The store is written outside the latch
//! mutex, so racing transitions on one key may persist in a different
//! order than they flip in memory. Subscribers receive a
//! [`LeaderChangeEvent`] for every transition.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use beacon_store::{
    FieldValue, Record, Schema, StoreHandle, FIELD_MODIFY_TIME, FIELD_VALID,
};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{MaintainError, MaintainResult};

/// Type container for persisted election state.
pub const ELECTION_TYPE: &str = "leader_election";

const EVENT_CAPACITY: usize = 64;

/// Persisted view of one election key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElectionState {
    pub elect_key: String,
    pub host: String,
    pub leader: bool,
    pub valid: bool,
    pub modify_time: DateTime<Utc>,
}

impl Record for ElectionState {
    fn schema() -> Schema<Self> {
        Schema::<Self>::new()
            .string("ElectKey", |r| &r.elect_key, |r, v| r.elect_key = v)
            .string("Host", |r| &r.host, |r, v| r.host = v)
            .bool("Leader", |r| r.leader, |r, v| r.leader = v)
            .bool(FIELD_VALID, |r| r.valid, |r, v| r.valid = v)
            .timestamp(FIELD_MODIFY_TIME, |r| r.modify_time, |r, v| r.modify_time = v)
    }
}

/// Published on every leadership transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderChangeEvent {
    pub key: String,
    pub host: String,
    pub leader: bool,
}

pub struct LeaderElection {
    store: StoreHandle,
    host: String,
    states: Mutex<HashMap<String, bool>>,
    events: broadcast::Sender<LeaderChangeEvent>,
}

impl LeaderElection {
    /// Create the latch for `host`.
    ///
    /// Leadership never survives a restart: every persisted key is reset
    /// to follower and tracked as such.
    pub fn new(store: StoreHandle, host: impl Into<String>) -> MaintainResult<Self> {
        let host = host.into();
        let now = Utc::now();
        let known = store.execute(true, |tx| {
            let persisted = store.load_all::<ElectionState>(ELECTION_TYPE, Some(tx))?;
            for (key, state) in &persisted {
                if state.leader {
                    store.update(
                        ELECTION_TYPE,
                        key,
                        &[
                            ("Leader", FieldValue::Bool(false)),
                            (FIELD_MODIFY_TIME, FieldValue::Timestamp(now)),
                        ],
                        Some(tx),
                    )?;
                    debug!(key = %key, previous_host = %state.host, "stale leadership reset");
                }
            }
            MaintainResult::Ok(persisted.into_keys().collect::<Vec<_>>())
        })?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let states = known.into_iter().map(|key| (key, false)).collect();
        Ok(Self {
            store,
            host,
            states: Mutex::new(states),
            events,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Receive leadership transitions from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LeaderChangeEvent> {
        self.events.subscribe()
    }

    /// Become leader for `key`. Already leading is a no-op.
    ///
    /// The latch mutex is never held while the state is persisted, so
    /// `is_leader` does not wait on the store's writer.
    pub fn try_acquire(&self, key: &str) -> MaintainResult<()> {
        if key.is_empty() {
            return Err(MaintainError::EmptyKey);
        }
        if self.is_leader(key) {
            return Ok(());
        }
        self.persist(key, true)?;

        let mut states = self.lock();
        if states.insert(key.to_string(), true) == Some(true) {
            // A concurrent acquire already flipped and published.
            return Ok(());
        }
        self.publish(key, true);
        drop(states);
        info!(key, host = %self.host, "leadership acquired");
        Ok(())
    }

    /// Pure local read.
    pub fn is_leader(&self, key: &str) -> bool {
        self.lock().get(key).copied().unwrap_or(false)
    }

    /// Give up leadership of `key`. Releasing a key held as follower is a
    /// no-op; releasing a key never seen is an error.
    pub fn release(&self, key: &str) -> MaintainResult<()> {
        if key.is_empty() {
            return Err(MaintainError::EmptyKey);
        }
        let current = self.lock().get(key).copied();
        match current {
            None => return Err(MaintainError::UnknownKey(key.to_string())),
            Some(false) => return Ok(()),
            Some(true) => {}
        }
        self.persist(key, false)?;

        let mut states = self.lock();
        if states.insert(key.to_string(), false) != Some(true) {
            return Ok(());
        }
        self.publish(key, false);
        drop(states);
        info!(key, host = %self.host, "leadership released");
        Ok(())
    }

    /// Persisted state of every election key, ordered by key.
    pub fn list(&self) -> MaintainResult<Vec<ElectionState>> {
        let mut states: Vec<_> = self
            .store
            .load_all::<ElectionState>(ELECTION_TYPE, None)?
            .into_values()
            .collect();
        states.sort_by(|a, b| a.elect_key.cmp(&b.elect_key));
        Ok(states)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, key: &str, leader: bool) -> MaintainResult<()> {
        let state = ElectionState {
            elect_key: key.to_string(),
            host: self.host.clone(),
            leader,
            valid: true,
            modify_time: Utc::now(),
        };
        self.store.save(ELECTION_TYPE, key, &state, None)?;
        Ok(())
    }

    fn publish(&self, key: &str, leader: bool) {
        let event = LeaderChangeEvent {
            key: key.to_string(),
            host: self.host.clone(),
            leader,
        };
        // No subscribers is not an error.
        if self.events.send(event).is_err() {
            debug!(key, "leadership change had no subscribers");
        }
    }
}
