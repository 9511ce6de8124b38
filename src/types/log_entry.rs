use crate::types::{LogIndex, LogTerm, ParticipantId, ParticipantsConfig, TermIndexPair};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// LogPayload is the opaque user data of a log entry. Payloads are compared byte-wise.
#[derive(Clone, PartialEq, Eq)]
pub struct LogPayload(Bytes);

impl LogPayload {
    /// Copies the external slice into a payload owned by the log.
    pub fn create_from_slice(data: &[u8]) -> Self {
        LogPayload(Bytes::copy_from_slice(data))
    }

    pub fn create_from_string(data: &str) -> Self {
        Self::create_from_slice(data.as_bytes())
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for LogPayload {
    fn from(bytes: Bytes) -> Self {
        LogPayload(bytes)
    }
}

impl fmt::Debug for LogPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Entries written by the replication protocol itself rather than by users.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogMetaPayload {
    /// First entry a leader writes in its term.
    FirstEntryOfTerm {
        leader: ParticipantId,
        participants: Arc<ParticipantsConfig>,
    },
    UpdateParticipantsConfig {
        participants: Arc<ParticipantsConfig>,
    },
}

impl LogMetaPayload {
    pub fn participants(&self) -> &Arc<ParticipantsConfig> {
        match self {
            LogMetaPayload::FirstEntryOfTerm { participants, .. } => participants,
            LogMetaPayload::UpdateParticipantsConfig { participants } => participants,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEntryPayload {
    Payload(LogPayload),
    Meta(LogMetaPayload),
}

/// PersistingLogEntry is the durable unit of the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistingLogEntry {
    term_index: TermIndexPair,
    payload: LogEntryPayload,
}

impl PersistingLogEntry {
    pub fn new(term_index: TermIndexPair, payload: LogEntryPayload) -> Self {
        PersistingLogEntry { term_index, payload }
    }

    pub fn with_payload(term: LogTerm, index: LogIndex, payload: LogPayload) -> Self {
        Self::new(TermIndexPair::new(term, index), LogEntryPayload::Payload(payload))
    }

    pub fn with_meta(term: LogTerm, index: LogIndex, meta: LogMetaPayload) -> Self {
        Self::new(TermIndexPair::new(term, index), LogEntryPayload::Meta(meta))
    }

    pub fn term_index_pair(&self) -> TermIndexPair {
        self.term_index
    }

    pub fn log_term(&self) -> LogTerm {
        self.term_index.term
    }

    pub fn log_index(&self) -> LogIndex {
        self.term_index.index
    }

    pub fn payload(&self) -> &LogEntryPayload {
        &self.payload
    }

    pub fn log_payload(&self) -> Option<&LogPayload> {
        match &self.payload {
            LogEntryPayload::Payload(p) => Some(p),
            LogEntryPayload::Meta(_) => None,
        }
    }

    pub fn meta(&self) -> Option<&LogMetaPayload> {
        match &self.payload {
            LogEntryPayload::Payload(_) => None,
            LogEntryPayload::Meta(m) => Some(m),
        }
    }
}

/// InMemoryLogEntry is a PersistingLogEntry plus bookkeeping that is never persisted. It is
/// shared between the in-memory log and in-flight AppendEntries batches and is never mutated.
#[derive(Clone, Debug)]
pub struct InMemoryLogEntry {
    entry: PersistingLogEntry,
    inserted_at: DateTime<Utc>,
    wait_for_sync: bool,
}

impl InMemoryLogEntry {
    pub fn new(entry: PersistingLogEntry, wait_for_sync: bool) -> Self {
        InMemoryLogEntry {
            entry,
            inserted_at: Utc::now(),
            wait_for_sync,
        }
    }

    pub fn entry(&self) -> &PersistingLogEntry {
        &self.entry
    }

    pub fn inserted_at(&self) -> DateTime<Utc> {
        self.inserted_at
    }

    pub fn wait_for_sync(&self) -> bool {
        self.wait_for_sync
    }
}

/// LogEntryView is what users of the log see: a committed user entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntryView {
    index: LogIndex,
    payload: LogPayload,
}

impl LogEntryView {
    pub fn new(index: LogIndex, payload: LogPayload) -> Self {
        LogEntryView { index, payload }
    }

    pub fn log_index(&self) -> LogIndex {
        self.index
    }

    pub fn payload(&self) -> &LogPayload {
        &self.payload
    }

    /// Meta entries have no view.
    pub fn from_entry(entry: &PersistingLogEntry) -> Option<Self> {
        entry
            .log_payload()
            .map(|p| LogEntryView::new(entry.log_index(), p.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_equality_is_bytewise() {
        let from_str = LogPayload::create_from_string("hello");
        let from_slice = LogPayload::create_from_slice(b"hello");
        assert_eq!(from_str, from_slice);
        assert_ne!(from_str, LogPayload::create_from_string("hellO"));
    }

    #[test]
    fn meta_entries_have_no_view() {
        let config = Arc::new(ParticipantsConfig::new(1, vec!["a".into()], 1));
        let meta = PersistingLogEntry::with_meta(
            LogTerm::new(1),
            LogIndex::new(1),
            LogMetaPayload::UpdateParticipantsConfig { participants: config },
        );
        assert!(LogEntryView::from_entry(&meta).is_none());

        let user = PersistingLogEntry::with_payload(
            LogTerm::new(1),
            LogIndex::new(2),
            LogPayload::create_from_string("x"),
        );
        let view = LogEntryView::from_entry(&user).unwrap();
        assert_eq!(view.log_index(), LogIndex::new(2));
        assert_eq!(view.payload(), &LogPayload::create_from_string("x"));
    }
}
