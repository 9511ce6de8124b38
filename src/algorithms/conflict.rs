use crate::types::{InMemoryLog, TermIndexPair};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConflictReason {
    LogEmpty,
    LogEntryAfterEnd,
    LogEntryBeforeBegin,
    LogEntryNoMatch,
}

/// Why a follower's log does not match the leader's claimed previous entry, and where the leader
/// should look next.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConflictInfo {
    pub reason: ConflictReason,
    pub hint: TermIndexPair,
}

impl ConflictInfo {
    pub fn new(reason: ConflictReason, hint: TermIndexPair) -> Self {
        ConflictInfo { reason, hint }
    }
}

/// Checks whether `log` contains `prev_log_entry`. On a term mismatch the hint points at the
/// start of the follower's conflicting term, so the leader skips back one term per round trip
/// instead of one entry.
pub fn detect_conflict(log: &InMemoryLog, prev_log_entry: TermIndexPair) -> Option<ConflictInfo> {
    if log.is_empty() {
        return Some(ConflictInfo::new(ConflictReason::LogEmpty, TermIndexPair::zero()));
    }

    let last = log.last_term_index_pair();
    if prev_log_entry.index > last.index {
        return Some(ConflictInfo::new(
            ConflictReason::LogEntryAfterEnd,
            TermIndexPair::new(last.term, last.index.plus(1)),
        ));
    }

    if prev_log_entry.index < log.first_index() {
        return Some(ConflictInfo::new(
            ConflictReason::LogEntryBeforeBegin,
            TermIndexPair::zero(),
        ));
    }

    let local_term = log.get_term_at(prev_log_entry.index)?;
    if local_term != prev_log_entry.term {
        let first_of_term = log
            .get_first_index_of_term(local_term)
            .unwrap_or(prev_log_entry.index);
        return Some(ConflictInfo::new(
            ConflictReason::LogEntryNoMatch,
            TermIndexPair::new(local_term, first_of_term),
        ));
    }

    None
}
