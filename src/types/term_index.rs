use std::fmt;

/// LogTerm is a leadership epoch. There is at most one leader per term, and terms only ever move
/// forward.
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct LogTerm(u64);

impl LogTerm {
    pub fn new(term: u64) -> Self {
        LogTerm(term)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn incr(&self) -> LogTerm {
        LogTerm(self.0 + 1)
    }
}

impl fmt::Debug for LogTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// LogIndex is the index of an entry in the log. Entries are indexed starting from 1; index 0
/// means "before the start of the log".
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct LogIndex(u64);

impl LogIndex {
    pub fn new(index: u64) -> Self {
        LogIndex(index)
    }

    pub fn zero() -> Self {
        LogIndex(0)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn plus(&self, delta: u64) -> LogIndex {
        LogIndex(self.0 + delta)
    }

    pub fn saturating_minus(&self, delta: u64) -> LogIndex {
        LogIndex(self.0.saturating_sub(delta))
    }

    /// Number of indexes in the half open range `[self, end)`.
    pub fn distance_to(&self, end: LogIndex) -> u64 {
        end.0.saturating_sub(self.0)
    }
}

impl fmt::Debug for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// TermIndexPair identifies a single log entry. Ordering is by term first and index second, which
/// makes it usable as a replication cursor: a later term always sorts after an earlier one.
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct TermIndexPair {
    pub term: LogTerm,
    pub index: LogIndex,
}

impl TermIndexPair {
    pub fn new(term: LogTerm, index: LogIndex) -> Self {
        TermIndexPair { term, index }
    }

    pub fn from_raw(term: u64, index: u64) -> Self {
        TermIndexPair::new(LogTerm::new(term), LogIndex::new(index))
    }

    /// The position before the first entry of any log.
    pub fn zero() -> Self {
        TermIndexPair::default()
    }
}

impl fmt::Debug for TermIndexPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?}:{:?})", self.term, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_orders_by_term_before_index() {
        assert!(TermIndexPair::from_raw(1, 9) < TermIndexPair::from_raw(2, 1));
        assert!(TermIndexPair::from_raw(2, 1) < TermIndexPair::from_raw(2, 2));
        assert_eq!(TermIndexPair::zero(), TermIndexPair::from_raw(0, 0));
    }

    #[test]
    fn index_arithmetic() {
        assert_eq!(LogIndex::new(3).plus(2), LogIndex::new(5));
        assert_eq!(LogIndex::new(1).saturating_minus(5), LogIndex::zero());
        assert_eq!(LogIndex::new(3).distance_to(LogIndex::new(7)), 4);
        assert_eq!(LogIndex::new(7).distance_to(LogIndex::new(3)), 0);
    }

    #[test]
    fn debug_is_compact() {
        assert_eq!(format!("{:?}", TermIndexPair::from_raw(3, 4)), "(T3:4)");
    }
}
