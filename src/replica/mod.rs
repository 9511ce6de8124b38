mod deferred;
mod follower;
mod leader;
mod local_follower;
mod peer_state;
mod replica_api;
mod status;
mod wait_for;

pub use deferred::DeferredAction;
pub use follower::FollowerTermInfo;
pub use follower::LogFollower;
pub use leader::LeaderTermInfo;
pub use leader::LogLeader;
pub use replica_api::AbstractFollower;
pub use replica_api::AppendEntriesErrorReason;
pub use replica_api::AppendEntriesRequest;
pub use replica_api::AppendEntriesResult;
pub use replica_api::ConstructionError;
pub use replica_api::ErrorCode;
pub use replica_api::FollowerCallError;
pub use replica_api::MessageId;
pub use replica_api::ParticipantError;
pub use replica_api::QuorumData;
pub use replica_api::WaitForError;
pub use replica_api::WaitForResult;
pub use status::FollowerStatistics;
pub use status::FollowerStatus;
pub use status::LeaderStatus;
pub use status::LocalStatus;
pub use status::LogStatus;
