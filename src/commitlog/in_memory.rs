use crate::commitlog::{LogMetadata, LogStore, LogStoreError, WriteOptions};
use crate::types::{LogIndex, PersistingLogEntry};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::sync::{Arc, Mutex};

// This models a durable store without touching disk. Entries are kept in their encoded form so
// the codec is exercised on every write and read.
//
// Clones share the same underlying log, so a test can keep a handle for inspection while a
// participant owns the store.
#[derive(Clone, Default)]
pub struct InMemoryLogStore {
    inner: Arc<Mutex<StoreInner>>,
}

#[derive(Default)]
struct StoreInner {
    entries: BTreeMap<u64, Bytes>,
    metadata: Option<LogMetadata>,
    fail_writes: bool,
    fail_inserts: bool,
    dropped: bool,
    synced_writes: u64,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        InMemoryLogStore::default()
    }

    /// When set, every following write fails until it is unset again.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Like `fail_writes`, but only for inserts. Removals still succeed.
    pub fn fail_inserts(&self, fail: bool) {
        self.lock().fail_inserts = fail;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn first_index(&self) -> Option<LogIndex> {
        self.lock().entries.keys().next().map(|i| LogIndex::new(*i))
    }

    pub fn last_index(&self) -> Option<LogIndex> {
        self.lock().entries.keys().next_back().map(|i| LogIndex::new(*i))
    }

    pub fn metadata(&self) -> Option<LogMetadata> {
        self.lock().metadata.clone()
    }

    /// Number of writes that asked to be synced.
    pub fn synced_writes(&self) -> u64 {
        self.lock().synced_writes
    }

    pub fn is_dropped(&self) -> bool {
        self.lock().dropped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("InMemoryLogStore mutex guard poison")
    }

    fn lock_for_write(&self, options: WriteOptions) -> Result<std::sync::MutexGuard<'_, StoreInner>, LogStoreError> {
        let mut inner = self.lock();
        if inner.dropped {
            return Err(LogStoreError::Dropped);
        }
        if inner.fail_writes {
            return Err(LogStoreError::WriteFailed("injected write failure".into()));
        }
        if options.wait_for_sync {
            inner.synced_writes += 1;
        }
        Ok(inner)
    }
}

#[async_trait::async_trait]
impl LogStore for InMemoryLogStore {
    async fn insert(&mut self, entries: Vec<PersistingLogEntry>, options: WriteOptions) -> Result<(), LogStoreError> {
        let mut inner = self.lock_for_write(options)?;
        if inner.fail_inserts {
            return Err(LogStoreError::WriteFailed("injected insert failure".into()));
        }

        let mut last = inner.entries.keys().next_back().map(|i| LogIndex::new(*i));
        for entry in entries.iter() {
            if let Some(last) = last {
                if entry.log_index() != last.plus(1) {
                    return Err(LogStoreError::NonContiguousInsert {
                        last,
                        actual: entry.log_index(),
                    });
                }
            }
            last = Some(entry.log_index());
        }

        for entry in entries.iter() {
            inner.entries.insert(entry.log_index().as_u64(), Bytes::from(entry));
        }

        Ok(())
    }

    fn read(&self, from: LogIndex) -> Result<Box<dyn Iterator<Item = PersistingLogEntry> + Send>, LogStoreError> {
        let inner = self.lock();
        if inner.dropped {
            return Err(LogStoreError::Dropped);
        }

        let entries = inner
            .entries
            .range(from.as_u64()..)
            .map(|(_, bytes)| PersistingLogEntry::try_from(&bytes[..]))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Box::new(entries.into_iter()))
    }

    async fn remove_front(&mut self, stop: LogIndex, options: WriteOptions) -> Result<(), LogStoreError> {
        let mut inner = self.lock_for_write(options)?;
        inner.entries = inner.entries.split_off(&stop.as_u64());
        Ok(())
    }

    async fn remove_back(&mut self, start: LogIndex, options: WriteOptions) -> Result<(), LogStoreError> {
        let mut inner = self.lock_for_write(options)?;
        inner.entries.split_off(&start.as_u64());
        Ok(())
    }

    fn update_metadata(&mut self, metadata: LogMetadata) -> Result<(), LogStoreError> {
        let mut inner = self.lock_for_write(WriteOptions::default())?;
        inner.metadata = Some(metadata);
        Ok(())
    }

    fn read_metadata(&self) -> Result<Option<LogMetadata>, LogStoreError> {
        let inner = self.lock();
        if inner.dropped {
            return Err(LogStoreError::Dropped);
        }
        Ok(inner.metadata.clone())
    }

    async fn drop_log(&mut self) -> Result<(), LogStoreError> {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.metadata = None;
        inner.dropped = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LogPayload, LogTerm};

    fn entries(term: u64, range: std::ops::Range<u64>) -> Vec<PersistingLogEntry> {
        range
            .map(|i| {
                PersistingLogEntry::with_payload(
                    LogTerm::new(term),
                    LogIndex::new(i),
                    LogPayload::create_from_string(&format!("entry-{}", i)),
                )
            })
            .collect()
    }

    fn read_indexes(store: &InMemoryLogStore, from: u64) -> Vec<u64> {
        store
            .read(LogIndex::new(from))
            .unwrap()
            .map(|e| e.log_index().as_u64())
            .collect()
    }

    #[tokio::test]
    async fn insert_read_and_truncate() {
        let mut store = InMemoryLogStore::new();
        store.insert(entries(1, 1..6), WriteOptions::default()).await.unwrap();
        assert_eq!(read_indexes(&store, 1), vec![1, 2, 3, 4, 5]);
        assert_eq!(read_indexes(&store, 4), vec![4, 5]);

        store.remove_front(LogIndex::new(3), WriteOptions::default()).await.unwrap();
        assert_eq!(store.first_index(), Some(LogIndex::new(3)));

        store.remove_back(LogIndex::new(5), WriteOptions::default()).await.unwrap();
        assert_eq!(read_indexes(&store, 1), vec![3, 4]);

        let first = store.read(LogIndex::new(1)).unwrap().next().unwrap();
        assert_eq!(first.log_payload(), Some(&LogPayload::create_from_string("entry-3")));
    }

    #[tokio::test]
    async fn rejects_gaps() {
        let mut store = InMemoryLogStore::new();
        store.insert(entries(1, 1..3), WriteOptions::default()).await.unwrap();
        let result = store.insert(entries(1, 4..5), WriteOptions::default()).await;
        assert!(matches!(result, Err(LogStoreError::NonContiguousInsert { .. })));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn injected_failures_and_sync_counting() {
        let mut store = InMemoryLogStore::new();
        let handle = store.clone();

        handle.fail_writes(true);
        let result = store.insert(entries(1, 1..2), WriteOptions { wait_for_sync: true }).await;
        assert!(matches!(result, Err(LogStoreError::WriteFailed(_))));
        assert!(handle.is_empty());

        handle.fail_writes(false);
        store
            .insert(entries(1, 1..2), WriteOptions { wait_for_sync: true })
            .await
            .unwrap();
        assert_eq!(handle.len(), 1);
        assert_eq!(handle.synced_writes(), 1);
    }

    #[tokio::test]
    async fn dropped_store_refuses_access() {
        let mut store = InMemoryLogStore::new();
        store
            .update_metadata(LogMetadata {
                term: LogTerm::new(2),
                leader: None,
            })
            .unwrap();
        store.drop_log().await.unwrap();

        assert!(store.is_dropped());
        assert!(matches!(store.read(LogIndex::new(1)), Err(LogStoreError::Dropped)));
        assert!(matches!(store.read_metadata(), Err(LogStoreError::Dropped)));
    }
}
