use crate::algorithms::ConflictInfo;
use crate::commitlog::{LogCore, LogStoreError};
use crate::types::{InMemoryLogEntry, InvalidParticipantsConfig, LogIndex, LogTerm, ParticipantId, TermIndexPair};
use std::fmt;
use std::sync::Arc;

/// MessageId is a logical clock for a leader's interactions with its followers. Every request a
/// leader sends gets a new, strictly larger id, so a follower can discard requests that arrive
/// out of order and the leader can discard responses to requests it no longer cares about.
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct MessageId(u64);

impl MessageId {
    pub fn new(id: u64) -> Self {
        MessageId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> MessageId {
        MessageId(self.0 + 1)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct AppendEntriesRequest {
    pub leader_id: ParticipantId,
    pub leader_term: LogTerm,
    // "Previous log entry" is the log entry immediately preceding `entries`. (0,0) means the
    // leader is sending from the start of its log.
    pub prev_log_entry: TermIndexPair,
    pub leader_commit: LogIndex,
    pub largest_common_index: LogIndex,
    pub lowest_index_to_keep: LogIndex,
    pub message_id: MessageId,
    pub entries: Vec<Arc<InMemoryLogEntry>>,
    pub wait_for_sync: bool,
}

impl AppendEntriesRequest {
    /// Last entry this request would leave on the follower.
    pub fn last_entry(&self) -> TermIndexPair {
        self.entries
            .last()
            .map(|e| e.entry().term_index_pair())
            .unwrap_or(self.prev_log_entry)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AppendEntriesErrorReason {
    None,
    WrongTerm,
    NoPrevLogMatch,
    InvalidLeaderId,
    LostLogCore,
    MessageOutdated,
    PersistenceFailure,
    CommunicationError,
}

/// Coarse classification of an AppendEntries outcome.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    Ok,
    /// Protocol disagreement; the leader resyncs.
    Rejection,
    /// The follower could not do the work; the leader backs off and retries.
    ResourceFailure,
    /// The follower could not be reached.
    TransportFailure,
}

impl AppendEntriesErrorReason {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppendEntriesErrorReason::None => ErrorCode::Ok,
            AppendEntriesErrorReason::WrongTerm
            | AppendEntriesErrorReason::NoPrevLogMatch
            | AppendEntriesErrorReason::InvalidLeaderId
            | AppendEntriesErrorReason::MessageOutdated => ErrorCode::Rejection,
            AppendEntriesErrorReason::LostLogCore | AppendEntriesErrorReason::PersistenceFailure => {
                ErrorCode::ResourceFailure
            }
            AppendEntriesErrorReason::CommunicationError => ErrorCode::TransportFailure,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppendEntriesResult {
    pub log_term: LogTerm,
    pub reason: AppendEntriesErrorReason,
    pub message_id: MessageId,
    pub conflict: Option<ConflictInfo>,
    pub details: Option<String>,
}

impl AppendEntriesResult {
    pub fn with_ok(log_term: LogTerm, message_id: MessageId) -> Self {
        AppendEntriesResult {
            log_term,
            reason: AppendEntriesErrorReason::None,
            message_id,
            conflict: None,
            details: None,
        }
    }

    pub fn with_rejection(log_term: LogTerm, message_id: MessageId, reason: AppendEntriesErrorReason) -> Self {
        AppendEntriesResult {
            log_term,
            reason,
            message_id,
            conflict: None,
            details: None,
        }
    }

    pub fn with_conflict(log_term: LogTerm, message_id: MessageId, conflict: ConflictInfo) -> Self {
        AppendEntriesResult {
            log_term,
            reason: AppendEntriesErrorReason::NoPrevLogMatch,
            message_id,
            conflict: Some(conflict),
            details: None,
        }
    }

    pub fn with_persistence_error(log_term: LogTerm, message_id: MessageId, error: &LogStoreError) -> Self {
        AppendEntriesResult {
            log_term,
            reason: AppendEntriesErrorReason::PersistenceFailure,
            message_id,
            conflict: None,
            details: Some(error.to_string()),
        }
    }

    pub fn with_communication_error(log_term: LogTerm, message_id: MessageId, details: String) -> Self {
        AppendEntriesResult {
            log_term,
            reason: AppendEntriesErrorReason::CommunicationError,
            message_id,
            conflict: None,
            details: Some(details),
        }
    }

    pub fn is_success(&self) -> bool {
        self.reason == AppendEntriesErrorReason::None
    }

    pub fn error_code(&self) -> ErrorCode {
        self.reason.error_code()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FollowerCallError {
    #[error("Participant {0} is unreachable")]
    Unreachable(ParticipantId),
    #[error("Participant {0} is not a follower")]
    NotAFollower(ParticipantId),
}

/// AbstractFollower is how a leader talks to one of its followers. Implementations may be local
/// or sit in front of a transport.
#[async_trait::async_trait]
pub trait AbstractFollower: Send + Sync {
    fn participant_id(&self) -> &ParticipantId;

    async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, FollowerCallError>;
}

/// Participants that acknowledged an index when it committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumData {
    pub index: LogIndex,
    pub term: LogTerm,
    pub quorum: Vec<ParticipantId>,
}

#[derive(Clone, Debug)]
pub struct WaitForResult {
    pub commit_index: LogIndex,
    /// Only known on the leader.
    pub quorum: Option<Arc<QuorumData>>,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum WaitForError {
    #[error("Leader of term {0:?} resigned")]
    LeaderResigned(LogTerm),
    #[error("Follower of term {0:?} resigned")]
    FollowerResigned(LogTerm),
}

#[derive(Debug, thiserror::Error)]
pub enum ParticipantError {
    #[error("Participant of term {0:?} has resigned")]
    Resigned(LogTerm),
    #[error("Invalid participants config: {0}")]
    InvalidConfig(#[from] InvalidParticipantsConfig),
    #[error("Participant {0} is not part of the config")]
    NotInConfig(ParticipantId),
    #[error("No follower handle for participant {0}")]
    MissingFollower(ParticipantId),
    #[error("Log already contains term {log_term:?}, newer than {term:?}")]
    LogAheadOfTerm { log_term: LogTerm, term: LogTerm },
    #[error("Log store failure: {0}")]
    Store(#[from] LogStoreError),
}

/// Returned when a participant could not be built. Hands the log core back so it isn't lost.
#[derive(Debug, thiserror::Error)]
#[error("Failed to construct participant: {error}")]
pub struct ConstructionError {
    pub core: LogCore,
    pub error: ParticipantError,
}

impl ConstructionError {
    pub fn new(core: LogCore, error: ParticipantError) -> Self {
        ConstructionError { core, error }
    }
}
