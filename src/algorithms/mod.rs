mod conflict;
mod quorum;

pub use conflict::detect_conflict;
pub use conflict::ConflictInfo;
pub use conflict::ConflictReason;
pub use quorum::calculate_commit_index;
pub use quorum::calculate_largest_common_index;
pub use quorum::CommitComputation;
pub use quorum::CommitFailReason;
pub use quorum::ParticipantQuorumState;
