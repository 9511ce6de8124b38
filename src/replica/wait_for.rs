use crate::replica::{WaitForError, WaitForResult};
use crate::types::LogIndex;
use std::collections::BTreeMap;
use tokio::sync::oneshot;

pub(crate) type WaitForOutcome = Result<WaitForResult, WaitForError>;
pub(crate) type WaitForPromise = oneshot::Sender<WaitForOutcome>;

/// Callers waiting for the commit index to reach some index, keyed by that index.
#[derive(Default)]
pub(crate) struct WaitForQueue {
    waiters: BTreeMap<LogIndex, Vec<WaitForPromise>>,
}

impl WaitForQueue {
    pub(crate) fn register(&mut self, index: LogIndex) -> oneshot::Receiver<WaitForOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters.entry(index).or_insert_with(Vec::new).push(tx);
        rx
    }

    /// Removes every waiter for an index of `index` or lower.
    pub(crate) fn take_up_to(&mut self, index: LogIndex) -> Vec<WaitForPromise> {
        let rest = self.waiters.split_off(&index.plus(1));
        let ready = std::mem::replace(&mut self.waiters, rest);
        ready.into_iter().flat_map(|(_, w)| w).collect()
    }

    pub(crate) fn take_all(&mut self) -> Vec<WaitForPromise> {
        std::mem::take(&mut self.waiters)
            .into_iter()
            .flat_map(|(_, w)| w)
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.values().map(Vec::len).sum()
    }
}

/// Resolves promises. Must be called without holding any participant lock.
pub(crate) fn resolve_all(promises: Vec<WaitForPromise>, outcome: WaitForOutcome) {
    for promise in promises {
        // Receiver may have given up waiting, that's fine.
        let _ = promise.send(outcome.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogTerm;

    #[test]
    fn takes_only_satisfied_waiters() {
        let mut queue = WaitForQueue::default();
        let mut r1 = queue.register(LogIndex::new(1));
        let _r3 = queue.register(LogIndex::new(3));
        let mut r2 = queue.register(LogIndex::new(2));
        assert_eq!(queue.len(), 3);

        let ready = queue.take_up_to(LogIndex::new(2));
        assert_eq!(ready.len(), 2);
        assert_eq!(queue.len(), 1);

        resolve_all(
            ready,
            Ok(WaitForResult {
                commit_index: LogIndex::new(2),
                quorum: None,
            }),
        );
        assert_eq!(r1.try_recv().unwrap().unwrap().commit_index, LogIndex::new(2));
        assert_eq!(r2.try_recv().unwrap().unwrap().commit_index, LogIndex::new(2));
    }

    #[test]
    fn take_all_empties_queue() {
        let mut queue = WaitForQueue::default();
        let mut rx = queue.register(LogIndex::new(10));
        resolve_all(queue.take_all(), Err(WaitForError::LeaderResigned(LogTerm::new(4))));
        assert_eq!(queue.len(), 0);
        assert_eq!(
            rx.try_recv().unwrap().unwrap_err(),
            WaitForError::LeaderResigned(LogTerm::new(4))
        );
    }
}
