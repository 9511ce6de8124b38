use crate::types::{InMemoryLogEntry, LogEntryView, LogIndex, LogTerm, PersistingLogEntry, TermIndexPair};
use std::collections::VecDeque;
use std::sync::Arc;

/// InMemoryLog is a gap free run of log entries `[first_index, last_index]`. The front is cut
/// by compaction, the back by conflict resolution. Entries are shared, so cloning the log or
/// slicing out a batch does not copy payloads.
///
/// An empty log reports `first_index() == 1` and `last_index() == 0`.
#[derive(Clone, Default)]
pub struct InMemoryLog {
    log: VecDeque<Arc<InMemoryLogEntry>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        InMemoryLog::default()
    }

    /// Builds a log from entries that were previously persisted.
    pub fn from_persisted<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = PersistingLogEntry>,
    {
        let mut log = InMemoryLog::new();
        log.append(entries.into_iter().map(|e| Arc::new(InMemoryLogEntry::new(e, false))));
        log
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn first_index(&self) -> LogIndex {
        self.log
            .front()
            .map(|e| e.entry().log_index())
            .unwrap_or_else(|| LogIndex::new(1))
    }

    pub fn last_index(&self) -> LogIndex {
        self.last_term_index_pair().index
    }

    pub fn last_term(&self) -> LogTerm {
        self.last_term_index_pair().term
    }

    /// The spearhead of the log, or `(0,0)` if the log is empty.
    pub fn last_term_index_pair(&self) -> TermIndexPair {
        self.log
            .back()
            .map(|e| e.entry().term_index_pair())
            .unwrap_or_else(TermIndexPair::zero)
    }

    pub fn next_index(&self) -> LogIndex {
        self.last_index().plus(1)
    }

    pub fn get_entry_by_index(&self, index: LogIndex) -> Option<&Arc<InMemoryLogEntry>> {
        let offset = self.offset_of(index)?;
        self.log.get(offset)
    }

    pub fn get_term_at(&self, index: LogIndex) -> Option<LogTerm> {
        self.get_entry_by_index(index).map(|e| e.entry().log_term())
    }

    /// Position of `index` in the log, if present.
    pub fn term_index_pair_at(&self, index: LogIndex) -> Option<TermIndexPair> {
        self.get_entry_by_index(index).map(|e| e.entry().term_index_pair())
    }

    /// Index of the first entry in the log with exactly `term`.
    pub fn get_first_index_of_term(&self, term: LogTerm) -> Option<LogIndex> {
        // Terms are non-decreasing along the log.
        let pos = partition_point(&self.log, |e| e.entry().log_term() < term);
        self.log
            .get(pos)
            .filter(|e| e.entry().log_term() == term)
            .map(|e| e.entry().log_index())
    }

    /// Appends entries to the back of the log. Panics if they would leave a gap, or if terms
    /// would go backwards, since either means the caller is tracking state wrong.
    pub fn append<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = Arc<InMemoryLogEntry>>,
    {
        for entry in entries {
            let pair = entry.entry().term_index_pair();
            if let Some(last) = self.log.back() {
                let last = last.entry().term_index_pair();
                assert_eq!(
                    pair.index,
                    last.index.plus(1),
                    "Log must stay contiguous. Last={:?}, New={:?}",
                    last,
                    pair
                );
                assert!(
                    pair.term >= last.term,
                    "Terms can only ratchet forward. Last={:?}, New={:?}",
                    last,
                    pair
                );
            }
            self.log.push_back(entry);
        }
    }

    /// Removes all entries with an index less than `stop`.
    pub fn remove_front(&mut self, stop: LogIndex) {
        while let Some(front) = self.log.front() {
            if front.entry().log_index() >= stop {
                break;
            }
            self.log.pop_front();
        }
    }

    /// Removes all entries with an index of `start` or greater.
    pub fn remove_back(&mut self, start: LogIndex) {
        while let Some(back) = self.log.back() {
            if back.entry().log_index() < start {
                break;
            }
            self.log.pop_back();
        }
    }

    /// Entries in `[from, to)`, clamped to what the log holds.
    pub fn slice(&self, from: LogIndex, to: LogIndex) -> Vec<Arc<InMemoryLogEntry>> {
        let from = from.max(self.first_index());
        let to = to.min(self.next_index());
        if from >= to {
            return vec![];
        }
        let start = (from.as_u64() - self.first_index().as_u64()) as usize;
        let len = from.distance_to(to) as usize;
        self.log.iter().skip(start).take(len).cloned().collect()
    }

    /// Persisted form of all entries from `from` onward.
    pub fn get_iterator_from(&self, from: LogIndex) -> PersistedLogIterator {
        PersistedLogIterator::new(self.slice(from, self.next_index()))
    }

    /// User visible entries in `[from, to)`. Meta entries are skipped.
    pub fn get_view_iterator(&self, from: LogIndex, to: LogIndex) -> LogViewIterator {
        LogViewIterator::new(self.slice(from, to))
    }

    fn offset_of(&self, index: LogIndex) -> Option<usize> {
        let first = self.log.front()?.entry().log_index();
        if index < first || index > self.last_index() {
            return None;
        }
        Some((index.as_u64() - first.as_u64()) as usize)
    }
}

fn partition_point<T, P: Fn(&T) -> bool>(entries: &VecDeque<T>, pred: P) -> usize {
    let (mut lo, mut hi) = (0, entries.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(&entries[mid]) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Iterates over a snapshot of log entries in their persisted form.
pub struct PersistedLogIterator {
    entries: std::vec::IntoIter<Arc<InMemoryLogEntry>>,
}

impl PersistedLogIterator {
    fn new(entries: Vec<Arc<InMemoryLogEntry>>) -> Self {
        PersistedLogIterator {
            entries: entries.into_iter(),
        }
    }
}

impl Iterator for PersistedLogIterator {
    type Item = PersistingLogEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next().map(|e| e.entry().clone())
    }
}

/// Iterates over a snapshot of user entries.
pub struct LogViewIterator {
    entries: std::vec::IntoIter<Arc<InMemoryLogEntry>>,
}

impl LogViewIterator {
    fn new(entries: Vec<Arc<InMemoryLogEntry>>) -> Self {
        LogViewIterator {
            entries: entries.into_iter(),
        }
    }
}

impl Iterator for LogViewIterator {
    type Item = LogEntryView;

    fn next(&mut self) -> Option<Self::Item> {
        for entry in &mut self.entries {
            if let Some(view) = LogEntryView::from_entry(entry.entry()) {
                return Some(view);
            }
        }
        None
    }
}
