use crate::replica::{LogFollower, LogLeader};
use crate::types::{LogIndex, ParticipantId};
use std::sync::Arc;

/// ReplicatedStateHandle is the replicated state machine's view of the log. The log calls it
/// whenever its role or commit index changes; the state machine reads committed entries back
/// through the participant it was handed.
///
/// Calls are never made while the log holds one of its internal locks, so implementations may
/// call back into the log.
pub trait ReplicatedStateHandle: Send + Sync {
    /// Called once a leader's first entry of its term has committed. Entries can be inserted
    /// before this, but only now is it known that a quorum follows this leader.
    fn leadership_established(&self, leader: Arc<LogLeader>);

    fn become_follower(&self, follower: Arc<LogFollower>);

    /// The follower's log was rewritten and no longer holds everything after `index`. The state
    /// machine has to get a snapshot from `leader` before it can continue applying entries.
    fn acquire_snapshot(&self, leader: &ParticipantId, index: LogIndex);

    fn update_commit_index(&self, index: LogIndex);

    /// Uncommitted entries from `from` onward were removed from the log. Any speculative
    /// progress past that point has to be discarded.
    fn drop_entries(&self, from: LogIndex);

    /// The participant this handle was told about has resigned.
    fn resign_current_state(&self);
}

pub struct NoOpStateHandle {
    // nothing
}

impl NoOpStateHandle {
    pub fn new() -> Self {
        NoOpStateHandle {}
    }
}

impl ReplicatedStateHandle for NoOpStateHandle {
    fn leadership_established(&self, _: Arc<LogLeader>) {}

    fn become_follower(&self, _: Arc<LogFollower>) {}

    fn acquire_snapshot(&self, _: &ParticipantId, _: LogIndex) {}

    fn update_commit_index(&self, _: LogIndex) {}

    fn drop_entries(&self, _: LogIndex) {}

    fn resign_current_state(&self) {}
}
