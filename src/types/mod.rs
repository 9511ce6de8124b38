mod in_memory_log;
mod log_entry;
mod participants;
mod term_index;

pub use in_memory_log::InMemoryLog;
pub use in_memory_log::LogViewIterator;
pub use in_memory_log::PersistedLogIterator;
pub use log_entry::InMemoryLogEntry;
pub use log_entry::LogEntryPayload;
pub use log_entry::LogEntryView;
pub use log_entry::LogMetaPayload;
pub use log_entry::LogPayload;
pub use log_entry::PersistingLogEntry;
pub use participants::InvalidParticipantsConfig;
pub use participants::ParticipantFlags;
pub use participants::ParticipantId;
pub use participants::ParticipantsConfig;
pub use term_index::LogIndex;
pub use term_index::LogTerm;
pub use term_index::TermIndexPair;
