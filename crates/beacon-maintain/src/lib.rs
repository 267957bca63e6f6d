//! beacon-maintain — consumers that keep a Beacon store healthy.
//!
//! - [`cleanup`]: soft delete plus batched purging of records whose soft
//!   delete is older than a retention window.
//! - [`election`]: a process-local leader latch, used to make sure only one
//!   task per process runs a given cleanup job.

pub mod cleanup;
pub mod election;
pub mod error;

pub use cleanup::{cleanup, soft_delete, CleanupJob, CleanupReport};
pub use election::{ElectionState, LeaderChangeEvent, LeaderElection, ELECTION_TYPE};
pub use error::{MaintainError, MaintainResult};
