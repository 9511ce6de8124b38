//! This mod is meant to hold most of the code for the library's client-facing API.
mod factory;
mod in_process;
mod options;
mod replicated_log;
mod state_handle;

pub use factory::DefaultParticipantsFactory;
pub use factory::FollowerHandleFactory;
pub use factory::ParticipantContext;
pub use factory::ParticipantsFactory;
pub use in_process::InProcessNetwork;
pub use options::ReplicatedLogOptions;
pub use replicated_log::InsertError;
pub use replicated_log::LogTermSpec;
pub use replicated_log::ReplicatedLog;
pub use replicated_log::ReplicatedLogError;
pub use state_handle::NoOpStateHandle;
pub use state_handle::ReplicatedStateHandle;

// So participants can be built with validated options.
pub(crate) use options::ValidatedLogOptions;
