mod algorithms;
mod api;
mod commitlog;
mod replica;
#[cfg(test)]
mod test_utils;
mod types;

pub use algorithms::calculate_commit_index;
pub use algorithms::calculate_largest_common_index;
pub use algorithms::detect_conflict;
pub use algorithms::CommitComputation;
pub use algorithms::CommitFailReason;
pub use algorithms::ConflictInfo;
pub use algorithms::ConflictReason;
pub use algorithms::ParticipantQuorumState;
pub use api::DefaultParticipantsFactory;
pub use api::FollowerHandleFactory;
pub use api::InProcessNetwork;
pub use api::InsertError;
pub use api::LogTermSpec;
pub use api::NoOpStateHandle;
pub use api::ParticipantContext;
pub use api::ParticipantsFactory;
pub use api::ReplicatedLog;
pub use api::ReplicatedLogError;
pub use api::ReplicatedLogOptions;
pub use api::ReplicatedStateHandle;
pub use commitlog::CodecError;
pub use commitlog::InMemoryLogStore;
pub use commitlog::LogCore;
pub use commitlog::LogMetadata;
pub use commitlog::LogStore;
pub use commitlog::LogStoreError;
pub use commitlog::WriteOptions;
pub use replica::AbstractFollower;
pub use replica::AppendEntriesErrorReason;
pub use replica::AppendEntriesRequest;
pub use replica::AppendEntriesResult;
pub use replica::ConstructionError;
pub use replica::DeferredAction;
pub use replica::ErrorCode;
pub use replica::FollowerCallError;
pub use replica::FollowerStatistics;
pub use replica::FollowerStatus;
pub use replica::FollowerTermInfo;
pub use replica::LeaderStatus;
pub use replica::LeaderTermInfo;
pub use replica::LocalStatus;
pub use replica::LogFollower;
pub use replica::LogLeader;
pub use replica::LogStatus;
pub use replica::MessageId;
pub use replica::ParticipantError;
pub use replica::QuorumData;
pub use replica::WaitForError;
pub use replica::WaitForResult;
pub use types::InMemoryLog;
pub use types::InMemoryLogEntry;
pub use types::InvalidParticipantsConfig;
pub use types::LogEntryPayload;
pub use types::LogEntryView;
pub use types::LogIndex;
pub use types::LogMetaPayload;
pub use types::LogPayload;
pub use types::LogTerm;
pub use types::LogViewIterator;
pub use types::ParticipantFlags;
pub use types::ParticipantId;
pub use types::ParticipantsConfig;
pub use types::PersistedLogIterator;
pub use types::PersistingLogEntry;
pub use types::TermIndexPair;

// Learning 1: `create::{root_mod}` should not have any code. Just `mod` and `pub use` statements.
// Learning 2: All `mod` statements, anywhere, should not be `pub`. Only export `pub` via individual
//             use statements.
//
// This keeps the `crate::{root_mod}` root_mod only responsible for exporting types to the rest of
// crate, and allows me to organize my root_mod impl however I want.
