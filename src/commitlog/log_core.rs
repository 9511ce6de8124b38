use crate::commitlog::{LogMetadata, LogStore, LogStoreError, WriteOptions};
use crate::types::{InMemoryLog, LogIndex, PersistingLogEntry};
use std::fmt;

/// LogCore is the exclusive write handle to a participant's durable log. Only one participant
/// holds it at a time; it is moved, never shared, when a participant resigns and another is
/// constructed in its place.
pub struct LogCore {
    store: Box<dyn LogStore>,
}

impl LogCore {
    pub fn new(store: Box<dyn LogStore>) -> Self {
        LogCore { store }
    }

    /// Reads the whole store into memory.
    pub fn load_in_memory_log(&self) -> Result<InMemoryLog, LogStoreError> {
        Ok(InMemoryLog::from_persisted(self.store.read(LogIndex::zero())?))
    }

    pub async fn insert(&mut self, entries: Vec<PersistingLogEntry>, wait_for_sync: bool) -> Result<(), LogStoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.store.insert(entries, WriteOptions { wait_for_sync }).await
    }

    pub async fn remove_front(&mut self, stop: LogIndex) -> Result<(), LogStoreError> {
        self.store.remove_front(stop, WriteOptions::default()).await
    }

    pub async fn remove_back(&mut self, start: LogIndex) -> Result<(), LogStoreError> {
        self.store.remove_back(start, WriteOptions::default()).await
    }

    pub fn update_metadata(&mut self, metadata: LogMetadata) -> Result<(), LogStoreError> {
        self.store.update_metadata(metadata)
    }

    pub fn read_metadata(&self) -> Result<Option<LogMetadata>, LogStoreError> {
        self.store.read_metadata()
    }

    pub async fn drop_log(&mut self) -> Result<(), LogStoreError> {
        self.store.drop_log().await
    }
}

impl fmt::Debug for LogCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogCore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::InMemoryLogStore;
    use crate::types::{LogPayload, LogTerm, TermIndexPair};

    #[tokio::test]
    async fn loads_what_was_persisted() {
        let store = InMemoryLogStore::new();
        let mut core = LogCore::new(Box::new(store.clone()));

        let entries = (1..=3)
            .map(|i| {
                PersistingLogEntry::with_payload(
                    LogTerm::new(2),
                    LogIndex::new(i),
                    LogPayload::create_from_string("x"),
                )
            })
            .collect();
        core.insert(entries, true).await.unwrap();
        core.remove_front(LogIndex::new(2)).await.unwrap();

        let log = core.load_in_memory_log().unwrap();
        assert_eq!(log.first_index(), LogIndex::new(2));
        assert_eq!(log.last_term_index_pair(), TermIndexPair::from_raw(2, 3));
        assert_eq!(store.synced_writes(), 1);
    }
}
