use crate::commitlog::CodecError;
use crate::types::{LogIndex, LogTerm, ParticipantId, PersistingLogEntry};

/// LogStore is the durable, append only log a replicated log participant writes to.
///
/// Log indexes entries starting from 1. Stores are owned by exactly one participant at a time
/// (see `LogCore`), so mutating methods take `&mut self`.
#[async_trait::async_trait]
pub trait LogStore: Send + Sync {
    /// insert() appends entries to the end of the log. Entries must continue the log without a
    /// gap, except when the store is empty.
    async fn insert(&mut self, entries: Vec<PersistingLogEntry>, options: WriteOptions) -> Result<(), LogStoreError>;

    /// Read all entries starting at `from`.
    fn read(&self, from: LogIndex) -> Result<Box<dyn Iterator<Item = PersistingLogEntry> + Send>, LogStoreError>;

    /// Removes every entry with an index less than `stop`.
    async fn remove_front(&mut self, stop: LogIndex, options: WriteOptions) -> Result<(), LogStoreError>;

    /// Removes every entry with an index of `start` or greater.
    async fn remove_back(&mut self, start: LogIndex, options: WriteOptions) -> Result<(), LogStoreError>;

    fn update_metadata(&mut self, metadata: LogMetadata) -> Result<(), LogStoreError>;

    fn read_metadata(&self) -> Result<Option<LogMetadata>, LogStoreError>;

    /// Deletes the log. Every later call fails with `LogStoreError::Dropped`.
    async fn drop_log(&mut self) -> Result<(), LogStoreError>;
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub wait_for_sync: bool,
}

/// Term and leader the log was last configured with. Written on every role change so a restarted
/// participant never goes back to an older term.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogMetadata {
    pub term: LogTerm,
    pub leader: Option<ParticipantId>,
}

#[derive(Debug, thiserror::Error)]
pub enum LogStoreError {
    #[error("Write to log store failed: {0}")]
    WriteFailed(String),
    #[error("Log store has been dropped")]
    Dropped,
    #[error("Insert at {actual:?} would leave a gap after {last:?}")]
    NonContiguousInsert { last: LogIndex, actual: LogIndex },
    #[error("Corrupted entry in log store: {0}")]
    Corrupted(#[from] CodecError),
}
