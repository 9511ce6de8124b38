use crate::algorithms::CommitFailReason;
use crate::replica::AppendEntriesErrorReason;
use crate::types::{LogIndex, LogTerm, ParticipantId, ParticipantsConfig, TermIndexPair};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Duration;

/// Status of the local copy of the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalStatus {
    pub spear_head: TermIndexPair,
    pub commit_index: LogIndex,
    pub first_index: LogIndex,
}

/// What the leader knows about one of its followers.
#[derive(Clone, Debug)]
pub struct FollowerStatistics {
    pub spear_head: TermIndexPair,
    pub commit_index: LogIndex,
    pub last_error_reason: AppendEntriesErrorReason,
    pub num_errors_in_a_row: u32,
    pub request_in_flight: bool,
    pub last_request_latency: Option<Duration>,
    pub last_response_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct LeaderStatus {
    pub local: LocalStatus,
    pub term: LogTerm,
    pub follower: BTreeMap<ParticipantId, FollowerStatistics>,
    pub active_participants_config: Arc<ParticipantsConfig>,
    pub committed_participants_config: Option<Arc<ParticipantsConfig>>,
    pub largest_common_index: LogIndex,
    pub lowest_index_to_keep: LogIndex,
    pub leadership_established: bool,
    pub last_commit_fail_reason: Option<CommitFailReason>,
}

#[derive(Clone, Debug)]
pub struct FollowerStatus {
    pub local: LocalStatus,
    pub leader: Option<ParticipantId>,
    pub term: LogTerm,
    pub largest_common_index: LogIndex,
    pub lowest_index_to_keep: LogIndex,
}

#[derive(Clone, Debug)]
pub enum LogStatus {
    Unconfigured,
    Leader(LeaderStatus),
    Follower(FollowerStatus),
    Dropped,
}

impl LogStatus {
    pub fn local(&self) -> Option<&LocalStatus> {
        match self {
            LogStatus::Leader(s) => Some(&s.local),
            LogStatus::Follower(s) => Some(&s.local),
            LogStatus::Unconfigured | LogStatus::Dropped => None,
        }
    }
}
