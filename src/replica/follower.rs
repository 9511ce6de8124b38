use crate::algorithms::{detect_conflict, ConflictInfo, ConflictReason};
use crate::api::ReplicatedStateHandle;
use crate::commitlog::LogCore;
use crate::replica::wait_for::{resolve_all, WaitForQueue};
use crate::replica::{
    AbstractFollower, AppendEntriesErrorReason, AppendEntriesRequest, AppendEntriesResult, ConstructionError,
    DeferredAction, FollowerCallError, FollowerStatus, LocalStatus, MessageId, ParticipantError, WaitForError,
    WaitForResult,
};
use crate::types::{
    InMemoryLog, InMemoryLogEntry, LogIndex, LogTerm, LogViewIterator, ParticipantId, PersistedLogIterator,
    TermIndexPair,
};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Debug)]
pub struct FollowerTermInfo {
    pub id: ParticipantId,
    pub term: LogTerm,
    pub leader: Option<ParticipantId>,
}

/// LogFollower accepts entries from the leader of its term and persists them. A follower never
/// changes term on its own; a new term always means a new follower.
pub struct LogFollower {
    logger: slog::Logger,
    id: ParticipantId,
    term: LogTerm,
    leader: Option<ParticipantId>,
    state_handle: Option<Arc<dyn ReplicatedStateHandle>>,
    // Held across store writes, so requests are applied one at a time.
    guarded: Mutex<GuardedFollowerData>,
}

struct GuardedFollowerData {
    // None once resigned.
    core: Option<LogCore>,
    in_memory_log: InMemoryLog,
    last_processed_message_id: MessageId,
    commit_index: LogIndex,
    largest_common_index: LogIndex,
    lowest_index_to_keep: LogIndex,
    wait_for: WaitForQueue,
}

/// Things to tell the state handle once the lock is released.
#[derive(Default)]
struct AppendNotifications {
    dropped_from: Option<LogIndex>,
    snapshot_from: Option<LogIndex>,
    new_commit_index: Option<LogIndex>,
}

/// How to bring the local log in line with a request.
struct AppendPlan {
    truncate_from: Option<LogIndex>,
    entries: Vec<Arc<InMemoryLogEntry>>,
    rewrite: bool,
}

impl LogFollower {
    pub(crate) fn construct(
        logger: slog::Logger,
        info: FollowerTermInfo,
        core: LogCore,
        state_handle: Option<Arc<dyn ReplicatedStateHandle>>,
    ) -> Result<Arc<LogFollower>, ConstructionError> {
        let in_memory_log = match core.load_in_memory_log() {
            Ok(log) => log,
            Err(e) => return Err(ConstructionError::new(core, e.into())),
        };

        let log_term = in_memory_log.last_term();
        if log_term > info.term {
            return Err(ConstructionError::new(
                core,
                ParticipantError::LogAheadOfTerm {
                    log_term,
                    term: info.term,
                },
            ));
        }

        let logger = logger.new(slog::o!(
            "Role" => "Follower",
            "Term" => info.term.as_u64(),
            "Leader" => format!("{:?}", info.leader),
        ));
        slog::info!(
            logger,
            "Following with log {:?}..{:?}",
            in_memory_log.first_index(),
            in_memory_log.last_term_index_pair()
        );

        Ok(Arc::new(LogFollower {
            logger,
            id: info.id,
            term: info.term,
            leader: info.leader,
            state_handle,
            guarded: Mutex::new(GuardedFollowerData {
                core: Some(core),
                in_memory_log,
                last_processed_message_id: MessageId::default(),
                commit_index: LogIndex::zero(),
                largest_common_index: LogIndex::zero(),
                lowest_index_to_keep: LogIndex::zero(),
                wait_for: WaitForQueue::default(),
            }),
        }))
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn term(&self) -> LogTerm {
        self.term
    }

    pub fn leader(&self) -> Option<&ParticipantId> {
        self.leader.as_ref()
    }

    pub async fn append_entries(&self, request: AppendEntriesRequest) -> AppendEntriesResult {
        let message_id = request.message_id;
        let mut guard = self.guarded.lock().await;
        let data = &mut *guard;

        let core = match data.core.as_mut() {
            Some(core) => core,
            None => {
                slog::warn!(self.logger, "Rejecting AppendEntries {:?}, already resigned", message_id);
                return self.reject(message_id, AppendEntriesErrorReason::LostLogCore);
            }
        };

        if self.leader.as_ref() != Some(&request.leader_id) {
            slog::info!(
                self.logger,
                "Rejecting AppendEntries {:?} from {:?}, not our leader",
                message_id,
                request.leader_id
            );
            return self.reject(message_id, AppendEntriesErrorReason::InvalidLeaderId);
        }

        if request.leader_term != self.term {
            slog::info!(
                self.logger,
                "Rejecting AppendEntries {:?} for term {:?}",
                message_id,
                request.leader_term
            );
            return self.reject(message_id, AppendEntriesErrorReason::WrongTerm);
        }

        if message_id <= data.last_processed_message_id {
            slog::warn!(
                self.logger,
                "Rejecting AppendEntries {:?}, already processed {:?}",
                message_id,
                data.last_processed_message_id
            );
            return self.reject(message_id, AppendEntriesErrorReason::MessageOutdated);
        }
        data.last_processed_message_id = message_id;

        if !is_well_formed(&request) {
            slog::warn!(self.logger, "Rejecting malformed AppendEntries {:?}", message_id);
            return AppendEntriesResult::with_conflict(
                self.term,
                message_id,
                ConflictInfo::new(ConflictReason::LogEntryBeforeBegin, TermIndexPair::zero()),
            );
        }

        if !request.prev_log_entry.index.is_zero() {
            if let Some(conflict) = detect_conflict(&data.in_memory_log, request.prev_log_entry) {
                slog::info!(
                    self.logger,
                    "No match for {:?}: {:?}",
                    request.prev_log_entry,
                    conflict
                );
                return AppendEntriesResult::with_conflict(self.term, message_id, conflict);
            }
        }

        let plan = plan_append(&data.in_memory_log, &request);
        let mut notifications = AppendNotifications::default();

        if let Some(from) = plan.truncate_from {
            let old_first = data.in_memory_log.first_index();
            if let Err(e) = core.remove_back(from).await {
                slog::error!(self.logger, "Failed to remove entries from {:?}: {:?}", from, e);
                return AppendEntriesResult::with_persistence_error(self.term, message_id, &e);
            }
            data.in_memory_log.remove_back(from);
            slog::info!(self.logger, "Removed entries from {:?}", from.max(old_first));
            notifications.dropped_from = Some(from.max(old_first));
        }

        if !plan.entries.is_empty() {
            let wait_for_sync = request.wait_for_sync || plan.entries.iter().any(|e| e.wait_for_sync());
            let persisting = plan.entries.iter().map(|e| e.entry().clone()).collect();
            if let Err(e) = core.insert(persisting, wait_for_sync).await {
                slog::error!(self.logger, "Failed to persist {} entries: {:?}", plan.entries.len(), e);
                // The truncation above already happened, and a retry won't see it again.
                drop(guard);
                self.notify(notifications);
                return AppendEntriesResult::with_persistence_error(self.term, message_id, &e);
            }

            let first_new = plan.entries[0].entry().log_index();
            if plan.rewrite && first_new > data.commit_index.plus(1) {
                notifications.snapshot_from = Some(first_new);
            }
            data.in_memory_log.append(plan.entries);
        }

        let new_commit_index = data
            .commit_index
            .max(request.leader_commit.min(data.in_memory_log.last_index()));
        if new_commit_index > data.commit_index {
            slog::debug!(self.logger, "Commit index {:?} -> {:?}", data.commit_index, new_commit_index);
            data.commit_index = new_commit_index;
            notifications.new_commit_index = Some(new_commit_index);
        }
        data.largest_common_index = data
            .largest_common_index
            .max(request.largest_common_index.min(data.commit_index));

        let compaction_stop = request.lowest_index_to_keep.min(data.commit_index);
        if compaction_stop > data.lowest_index_to_keep && compaction_stop > data.in_memory_log.first_index() {
            match core.remove_front(compaction_stop).await {
                Ok(()) => {
                    data.in_memory_log.remove_front(compaction_stop);
                    data.lowest_index_to_keep = compaction_stop;
                    slog::debug!(self.logger, "Compacted log up to {:?}", compaction_stop);
                }
                Err(e) => slog::warn!(self.logger, "Failed to compact log up to {:?}: {:?}", compaction_stop, e),
            }
        }

        let resolved = data.wait_for.take_up_to(data.commit_index);
        let commit_index = data.commit_index;
        drop(guard);

        resolve_all(
            resolved,
            Ok(WaitForResult {
                commit_index,
                quorum: None,
            }),
        );
        self.notify(notifications);

        AppendEntriesResult::with_ok(self.term, message_id)
    }

    fn reject(&self, message_id: MessageId, reason: AppendEntriesErrorReason) -> AppendEntriesResult {
        AppendEntriesResult::with_rejection(self.term, message_id, reason)
    }

    fn notify(&self, notifications: AppendNotifications) {
        let handle = match &self.state_handle {
            Some(handle) => handle,
            None => return,
        };
        if let Some(from) = notifications.dropped_from {
            handle.drop_entries(from);
        }
        if let (Some(index), Some(leader)) = (notifications.snapshot_from, self.leader.as_ref()) {
            handle.acquire_snapshot(leader, index);
        }
        if let Some(index) = notifications.new_commit_index {
            handle.update_commit_index(index);
        }
    }

    /// Resolves once the local commit index reaches `index`.
    pub async fn wait_for(&self, index: LogIndex) -> Result<WaitForResult, WaitForError> {
        let rx = {
            let mut data = self.guarded.lock().await;
            if data.core.is_none() {
                return Err(WaitForError::FollowerResigned(self.term));
            }
            if data.commit_index >= index {
                return Ok(WaitForResult {
                    commit_index: data.commit_index,
                    quorum: None,
                });
            }
            data.wait_for.register(index)
        };

        rx.await.unwrap_or(Err(WaitForError::FollowerResigned(self.term)))
    }

    /// Gives up the log core. Pending waiters are failed when the returned action runs.
    pub async fn resign(&self) -> Result<(LogCore, DeferredAction), ParticipantError> {
        let mut data = self.guarded.lock().await;
        let core = data.core.take().ok_or(ParticipantError::Resigned(self.term))?;
        let waiters = data.wait_for.take_all();
        slog::info!(self.logger, "Resigned with {} pending waiters", waiters.len());

        let term = self.term;
        let action = DeferredAction::new(move || resolve_all(waiters, Err(WaitForError::FollowerResigned(term))));
        Ok((core, action))
    }

    pub async fn get_status(&self) -> FollowerStatus {
        let data = self.guarded.lock().await;
        FollowerStatus {
            local: LocalStatus {
                spear_head: data.in_memory_log.last_term_index_pair(),
                commit_index: data.commit_index,
                first_index: data.in_memory_log.first_index(),
            },
            leader: self.leader.clone(),
            term: self.term,
            largest_common_index: data.largest_common_index,
            lowest_index_to_keep: data.lowest_index_to_keep,
        }
    }

    pub async fn get_commit_index(&self) -> LogIndex {
        self.guarded.lock().await.commit_index
    }

    /// Every entry from `from` on, committed or not.
    pub async fn get_log_iterator(&self, from: LogIndex) -> PersistedLogIterator {
        self.guarded.lock().await.in_memory_log.get_iterator_from(from)
    }

    /// Committed user entries from `from` on.
    pub async fn get_committed_log_iterator(&self, from: LogIndex) -> LogViewIterator {
        let data = self.guarded.lock().await;
        data.in_memory_log
            .get_view_iterator(from, data.commit_index.plus(1))
    }

    pub async fn copy_in_memory_log(&self) -> InMemoryLog {
        self.guarded.lock().await.in_memory_log.clone()
    }
}

#[async_trait::async_trait]
impl AbstractFollower for LogFollower {
    fn participant_id(&self) -> &ParticipantId {
        &self.id
    }

    async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, FollowerCallError> {
        Ok(LogFollower::append_entries(self, request).await)
    }
}

/// Entries must be contiguous, with non-decreasing terms no newer than the leader's, and must
/// continue right after `prev_log_entry` when one is given.
fn is_well_formed(request: &AppendEntriesRequest) -> bool {
    let mut expected = Some(request.prev_log_entry).filter(|prev| !prev.index.is_zero());
    for entry in request.entries.iter() {
        let pair = entry.entry().term_index_pair();
        if pair.index.is_zero() || pair.term > request.leader_term {
            return false;
        }
        if let Some(prev) = expected {
            if pair.index != prev.index.plus(1) || pair.term < prev.term {
                return false;
            }
        }
        expected = Some(pair);
    }
    true
}

fn plan_append(log: &InMemoryLog, request: &AppendEntriesRequest) -> AppendPlan {
    let first_new = match request.entries.first() {
        Some(entry) => entry.entry().log_index(),
        None => {
            return AppendPlan {
                truncate_from: None,
                entries: vec![],
                rewrite: false,
            }
        }
    };

    // With prev (0,0) the leader sends from the start of its own log. If that doesn't line up
    // with what we hold, or we hold nothing, the batch starts our log over.
    let rewrite = request.prev_log_entry.index.is_zero()
        && (log.is_empty() || first_new < log.first_index() || first_new > log.next_index());
    if rewrite {
        return AppendPlan {
            truncate_from: Some(LogIndex::zero()).filter(|_| !log.is_empty()),
            entries: request.entries.clone(),
            rewrite: true,
        };
    }

    // Skip what we already have. Only truncate on an actual mismatch, so a delayed request can't
    // remove entries a newer one already added.
    let mut entries = request.entries.iter().peekable();
    while let Some(entry) = entries.peek() {
        let pair = entry.entry().term_index_pair();
        match log.get_term_at(pair.index) {
            Some(term) if term == pair.term => {
                entries.next();
            }
            Some(_) => {
                return AppendPlan {
                    truncate_from: Some(pair.index),
                    entries: entries.cloned().collect(),
                    rewrite: false,
                }
            }
            None => break,
        }
    }

    AppendPlan {
        truncate_from: None,
        entries: entries.cloned().collect(),
        rewrite: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::InMemoryLogStore;
    use crate::test_utils::{payload_entries, test_logger, RecordingStateHandle, StateEvent};
    use crate::types::LogPayload;

    struct Fixture {
        store: InMemoryLogStore,
        follower: Arc<LogFollower>,
        handle: Arc<RecordingStateHandle>,
    }

    async fn follower_with_log(term: u64, existing: Vec<Arc<InMemoryLogEntry>>) -> Fixture {
        let store = InMemoryLogStore::new();
        let mut core = LogCore::new(Box::new(store.clone()));
        core.insert(existing.iter().map(|e| e.entry().clone()).collect(), false)
            .await
            .unwrap();

        let handle = Arc::new(RecordingStateHandle::new());
        let follower = LogFollower::construct(
            test_logger(),
            FollowerTermInfo {
                id: "follower".into(),
                term: LogTerm::new(term),
                leader: Some("leader".into()),
            },
            core,
            Some(handle.clone()),
        )
        .unwrap();

        Fixture { store, follower, handle }
    }

    fn request(
        term: u64,
        message_id: u64,
        prev: TermIndexPair,
        commit: u64,
        entries: Vec<Arc<InMemoryLogEntry>>,
    ) -> AppendEntriesRequest {
        AppendEntriesRequest {
            leader_id: "leader".into(),
            leader_term: LogTerm::new(term),
            prev_log_entry: prev,
            leader_commit: LogIndex::new(commit),
            largest_common_index: LogIndex::zero(),
            lowest_index_to_keep: LogIndex::zero(),
            message_id: MessageId::new(message_id),
            entries,
            wait_for_sync: false,
        }
    }

    async fn log_pairs(follower: &LogFollower) -> Vec<TermIndexPair> {
        follower
            .get_log_iterator(LogIndex::zero())
            .await
            .map(|e| e.term_index_pair())
            .collect()
    }

    #[tokio::test]
    async fn appends_and_commits() {
        let f = follower_with_log(1, vec![]).await;

        let result = f
            .follower
            .append_entries(request(1, 1, TermIndexPair::zero(), 2, payload_entries(1, 1..=3)))
            .await;
        assert!(result.is_success());

        let status = f.follower.get_status().await;
        assert_eq!(status.local.spear_head, TermIndexPair::from_raw(1, 3));
        assert_eq!(status.local.commit_index, LogIndex::new(2));
        assert_eq!(f.store.len(), 3);
        assert_eq!(f.handle.events(), vec![StateEvent::CommitIndex(LogIndex::new(2))]);

        let committed: Vec<_> = f
            .follower
            .get_committed_log_iterator(LogIndex::new(1))
            .await
            .map(|v| v.log_index())
            .collect();
        assert_eq!(committed, vec![LogIndex::new(1), LogIndex::new(2)]);
    }

    #[tokio::test]
    async fn last_index_matches_prev_plus_entries() {
        let f = follower_with_log(2, payload_entries(1, 1..=3)).await;

        let prev = TermIndexPair::from_raw(1, 3);
        let entries = payload_entries(2, 4..=5);
        let count = entries.len() as u64;
        let result = f.follower.append_entries(request(2, 1, prev, 0, entries)).await;
        assert!(result.is_success());

        let status = f.follower.get_status().await;
        assert_eq!(status.local.spear_head.index, prev.index.plus(count));
        assert_eq!(status.local.spear_head.term, LogTerm::new(2));
    }

    #[tokio::test]
    async fn replayed_message_is_outdated() {
        let f = follower_with_log(1, vec![]).await;
        let req = request(1, 7, TermIndexPair::zero(), 0, payload_entries(1, 1..=2));

        assert!(f.follower.append_entries(req.clone()).await.is_success());
        let result = f.follower.append_entries(req).await;
        assert_eq!(result.reason, AppendEntriesErrorReason::MessageOutdated);
        assert_eq!(log_pairs(&f.follower).await.len(), 2);
    }

    #[tokio::test]
    async fn rejects_wrong_leader_and_term() {
        let f = follower_with_log(3, vec![]).await;

        let mut wrong_leader = request(3, 1, TermIndexPair::zero(), 0, vec![]);
        wrong_leader.leader_id = "impostor".into();
        assert_eq!(
            f.follower.append_entries(wrong_leader).await.reason,
            AppendEntriesErrorReason::InvalidLeaderId
        );

        let old_term = request(2, 2, TermIndexPair::zero(), 0, vec![]);
        assert_eq!(
            f.follower.append_entries(old_term).await.reason,
            AppendEntriesErrorReason::WrongTerm
        );
        let future_term = request(4, 3, TermIndexPair::zero(), 0, vec![]);
        assert_eq!(
            f.follower.append_entries(future_term).await.reason,
            AppendEntriesErrorReason::WrongTerm
        );
    }

    #[tokio::test]
    async fn conflict_returns_hint() {
        let mut existing = payload_entries(1, 1..=3);
        existing.extend(payload_entries(3, 4..=6));
        let f = follower_with_log(4, existing).await;

        let result = f
            .follower
            .append_entries(request(4, 1, TermIndexPair::from_raw(4, 6), 0, vec![]))
            .await;
        assert_eq!(result.reason, AppendEntriesErrorReason::NoPrevLogMatch);
        assert_eq!(
            result.conflict,
            Some(ConflictInfo::new(
                ConflictReason::LogEntryNoMatch,
                TermIndexPair::from_raw(3, 4)
            ))
        );
    }

    #[tokio::test]
    async fn empty_log_conflict() {
        let f = follower_with_log(1, vec![]).await;
        let result = f
            .follower
            .append_entries(request(1, 1, TermIndexPair::from_raw(1, 3), 0, vec![]))
            .await;
        assert_eq!(
            result.conflict,
            Some(ConflictInfo::new(ConflictReason::LogEmpty, TermIndexPair::zero()))
        );
    }

    #[tokio::test]
    async fn diverging_suffix_is_replaced() {
        let mut existing = payload_entries(1, 1..=2);
        existing.extend(payload_entries(2, 3..=5));
        let f = follower_with_log(3, existing).await;

        let result = f
            .follower
            .append_entries(request(3, 1, TermIndexPair::from_raw(1, 2), 0, payload_entries(3, 3..=3)))
            .await;
        assert!(result.is_success());
        assert_eq!(
            log_pairs(&f.follower).await,
            vec![
                TermIndexPair::from_raw(1, 1),
                TermIndexPair::from_raw(1, 2),
                TermIndexPair::from_raw(3, 3)
            ]
        );
        assert_eq!(f.store.last_index(), Some(LogIndex::new(3)));
        assert_eq!(f.handle.events(), vec![StateEvent::DropEntries(LogIndex::new(3))]);
    }

    #[tokio::test]
    async fn delayed_request_does_not_truncate() {
        let f = follower_with_log(1, vec![]).await;
        let all = payload_entries(1, 1..=4);

        let newer = request(1, 2, TermIndexPair::zero(), 0, all.clone());
        assert!(f.follower.append_entries(newer).await.is_success());

        // Same prefix under a fresh id: nothing to do, nothing lost.
        let prefix = request(1, 3, TermIndexPair::from_raw(1, 1), 0, all[1..2].to_vec());
        assert!(f.follower.append_entries(prefix).await.is_success());
        assert_eq!(log_pairs(&f.follower).await.len(), 4);
    }

    #[tokio::test]
    async fn rewrite_replaces_whole_log() {
        let f = follower_with_log(3, payload_entries(2, 1..=3)).await;

        let entry = payload_entries(3, 20..=20);
        let result = f
            .follower
            .append_entries(request(3, 1, TermIndexPair::zero(), 0, entry))
            .await;
        assert!(result.is_success());

        let mut iter = f.follower.get_log_iterator(LogIndex::new(1)).await;
        assert_eq!(iter.next().map(|e| e.log_index()), Some(LogIndex::new(20)));
        assert!(iter.next().is_none());
        assert_eq!(f.store.first_index(), Some(LogIndex::new(20)));
        assert_eq!(
            f.handle.events(),
            vec![
                StateEvent::DropEntries(LogIndex::new(1)),
                StateEvent::AcquireSnapshot("leader".into(), LogIndex::new(20)),
            ]
        );
    }

    #[tokio::test]
    async fn empty_follower_asks_for_snapshot_on_gap() {
        let f = follower_with_log(3, vec![]).await;

        let result = f
            .follower
            .append_entries(request(3, 1, TermIndexPair::zero(), 0, payload_entries(3, 20..=20)))
            .await;
        assert!(result.is_success());
        assert_eq!(f.store.first_index(), Some(LogIndex::new(20)));
        assert_eq!(
            f.handle.events(),
            vec![StateEvent::AcquireSnapshot("leader".into(), LogIndex::new(20))]
        );

        // Starting at the first index leaves no gap.
        let g = follower_with_log(3, vec![]).await;
        let result = g
            .follower
            .append_entries(request(3, 1, TermIndexPair::zero(), 0, payload_entries(3, 1..=2)))
            .await;
        assert!(result.is_success());
        assert!(g.handle.events().is_empty());
    }

    #[tokio::test]
    async fn failed_insert_still_reports_dropped_entries() {
        let mut existing = payload_entries(1, 1..=2);
        existing.extend(payload_entries(2, 3..=4));
        let f = follower_with_log(3, existing).await;
        f.store.fail_inserts(true);

        let req = request(3, 1, TermIndexPair::from_raw(1, 2), 0, payload_entries(3, 3..=3));
        let result = f.follower.append_entries(req.clone()).await;
        assert_eq!(result.reason, AppendEntriesErrorReason::PersistenceFailure);
        assert_eq!(f.store.last_index(), Some(LogIndex::new(2)));
        assert_eq!(f.handle.events(), vec![StateEvent::DropEntries(LogIndex::new(3))]);

        // The retry has nothing left to truncate and reports no second drop.
        f.store.fail_inserts(false);
        let mut retry = req;
        retry.message_id = MessageId::new(2);
        assert!(f.follower.append_entries(retry).await.is_success());
        assert_eq!(f.store.last_index(), Some(LogIndex::new(3)));
        assert_eq!(f.handle.events(), vec![StateEvent::DropEntries(LogIndex::new(3))]);
    }

    #[tokio::test]
    async fn malformed_batch_is_rejected() {
        let f = follower_with_log(1, vec![]).await;
        let mut entries = payload_entries(1, 1..=1);
        entries.extend(payload_entries(1, 3..=3));

        let result = f
            .follower
            .append_entries(request(1, 1, TermIndexPair::zero(), 0, entries))
            .await;
        assert_eq!(result.reason, AppendEntriesErrorReason::NoPrevLogMatch);
        assert!(log_pairs(&f.follower).await.is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_is_reported() {
        let f = follower_with_log(1, vec![]).await;
        f.store.fail_writes(true);

        let result = f
            .follower
            .append_entries(request(1, 1, TermIndexPair::zero(), 1, payload_entries(1, 1..=1)))
            .await;
        assert_eq!(result.reason, AppendEntriesErrorReason::PersistenceFailure);
        assert!(result.details.is_some());
        assert_eq!(f.follower.get_commit_index().await, LogIndex::zero());
    }

    #[tokio::test]
    async fn compacts_to_leader_lowest_index_to_keep() {
        let f = follower_with_log(1, vec![]).await;

        let mut req = request(1, 1, TermIndexPair::zero(), 4, payload_entries(1, 1..=5));
        req.largest_common_index = LogIndex::new(4);
        req.lowest_index_to_keep = LogIndex::new(3);
        assert!(f.follower.append_entries(req).await.is_success());

        let status = f.follower.get_status().await;
        assert_eq!(status.local.first_index, LogIndex::new(3));
        assert_eq!(status.lowest_index_to_keep, LogIndex::new(3));
        assert_eq!(status.largest_common_index, LogIndex::new(4));
        assert_eq!(f.store.first_index(), Some(LogIndex::new(3)));
    }

    #[tokio::test]
    async fn wait_for_and_resign() {
        let f = follower_with_log(1, vec![]).await;

        let follower = f.follower.clone();
        let waiter = tokio::spawn(async move { follower.wait_for(LogIndex::new(1)).await });
        let far_waiter = {
            let follower = f.follower.clone();
            tokio::spawn(async move { follower.wait_for(LogIndex::new(10)).await })
        };
        tokio::task::yield_now().await;

        let mut entries = payload_entries(1, 1..=1);
        entries.push(Arc::new(InMemoryLogEntry::new(
            crate::types::PersistingLogEntry::with_payload(
                LogTerm::new(1),
                LogIndex::new(2),
                LogPayload::create_from_string("two"),
            ),
            false,
        )));
        f.follower
            .append_entries(request(1, 1, TermIndexPair::zero(), 1, entries))
            .await;
        assert_eq!(waiter.await.unwrap().unwrap().commit_index, LogIndex::new(1));

        let (_core, action) = f.follower.resign().await.unwrap();
        action.fire();
        assert_eq!(
            far_waiter.await.unwrap().unwrap_err(),
            WaitForError::FollowerResigned(LogTerm::new(1))
        );

        let result = f
            .follower
            .append_entries(request(1, 2, TermIndexPair::from_raw(1, 2), 2, vec![]))
            .await;
        assert_eq!(result.reason, AppendEntriesErrorReason::LostLogCore);
        assert!(f.follower.resign().await.is_err());
    }
}
