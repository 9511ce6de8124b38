use crate::algorithms::{
    calculate_commit_index, calculate_largest_common_index, CommitFailReason, ParticipantQuorumState,
};
use crate::api::{ReplicatedStateHandle, ValidatedLogOptions};
use crate::commitlog::LogCore;
use crate::replica::local_follower::LocalFollower;
use crate::replica::peer_state::{PeerState, PeerStateUpdate, ReplicationContext};
use crate::replica::wait_for::{resolve_all, WaitForOutcome, WaitForPromise, WaitForQueue};
use crate::replica::{
    AbstractFollower, AppendEntriesRequest, AppendEntriesResult, ConstructionError, DeferredAction, FollowerStatistics,
    LeaderStatus, LocalStatus, MessageId, ParticipantError, QuorumData, WaitForError, WaitForResult,
};
use crate::types::{
    InMemoryLog, InMemoryLogEntry, LogIndex, LogMetaPayload, LogPayload, LogTerm, LogViewIterator, ParticipantId,
    ParticipantsConfig, PersistingLogEntry, TermIndexPair,
};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::Instant;

#[derive(Clone, Debug)]
pub struct LeaderTermInfo {
    pub id: ParticipantId,
    pub term: LogTerm,
    pub config: Arc<ParticipantsConfig>,
    /// Message ids continue after this one. A leader rebuilt within the same term must not reuse
    /// ids its predecessor already sent.
    pub last_message_id: MessageId,
}

/// LogLeader replicates its log to the followers of its term and decides which entries are
/// committed.
///
/// The leader's own copy of the log is written through a local follower, so the leader only
/// counts itself toward a quorum once an entry is durable.
pub struct LogLeader {
    logger: slog::Logger,
    id: ParticipantId,
    term: LogTerm,
    first_index_of_term: LogIndex,
    options: ValidatedLogOptions,
    local: Arc<LocalFollower>,
    state_handle: Option<Arc<dyn ReplicatedStateHandle>>,
    // Never held across an await.
    guarded: Mutex<GuardedLeaderData>,
}

struct GuardedLeaderData {
    in_memory_log: InMemoryLog,
    followers: BTreeMap<ParticipantId, PeerState>,

    // The active config is used for quorum decisions as soon as its entry is in the log. The
    // committed config trails it until that entry commits.
    active_config: Arc<ParticipantsConfig>,
    active_config_index: LogIndex,
    committed_config: Option<Arc<ParticipantsConfig>>,
    pending_configs: VecDeque<(LogIndex, Arc<ParticipantsConfig>)>,

    commit_index: LogIndex,
    largest_common_index: LogIndex,
    lowest_index_to_keep: LogIndex,
    release_index: LogIndex,
    last_quorum: Option<Arc<QuorumData>>,
    last_commit_fail_reason: Option<CommitFailReason>,
    leadership_established: bool,

    wait_for: WaitForQueue,
    last_message_id: MessageId,
    resigned: bool,
}

/// Side effects of a commit index change, run after the lock is released.
#[derive(Default)]
struct CommitUpdate {
    new_commit_index: Option<LogIndex>,
    resolved: Vec<WaitForPromise>,
    result: Option<WaitForResult>,
    leadership_established: bool,
}

impl CommitUpdate {
    fn apply(self, leader: &Arc<LogLeader>) {
        if let Some(handle) = &leader.state_handle {
            if self.leadership_established {
                handle.leadership_established(Arc::clone(leader));
            }
            if let Some(index) = self.new_commit_index {
                handle.update_commit_index(index);
            }
        }
        if let Some(result) = self.result {
            resolve_all(self.resolved, Ok(result));
        }
    }
}

enum Registration {
    Ready(WaitForOutcome),
    Pending(oneshot::Receiver<WaitForOutcome>),
}

impl LogLeader {
    pub(crate) fn construct(
        logger: slog::Logger,
        info: LeaderTermInfo,
        core: LogCore,
        followers: Vec<Arc<dyn AbstractFollower>>,
        options: ValidatedLogOptions,
        state_handle: Option<Arc<dyn ReplicatedStateHandle>>,
    ) -> Result<Arc<LogLeader>, ConstructionError> {
        let config = info.config.clone();
        if let Err(e) = config.validate() {
            return Err(ConstructionError::new(core, e.into()));
        }
        if !config.contains(&info.id) {
            return Err(ConstructionError::new(core, ParticipantError::NotInConfig(info.id)));
        }

        let mut handles: BTreeMap<ParticipantId, Arc<dyn AbstractFollower>> = followers
            .into_iter()
            .map(|f| (f.participant_id().clone(), f))
            .collect();
        for id in config.participants.keys() {
            if *id != info.id && !handles.contains_key(id) {
                return Err(ConstructionError::new(core, ParticipantError::MissingFollower(id.clone())));
            }
        }

        let mut in_memory_log = match core.load_in_memory_log() {
            Ok(log) => log,
            Err(e) => return Err(ConstructionError::new(core, e.into())),
        };
        let spearhead = in_memory_log.last_term_index_pair();
        if spearhead.term > info.term {
            return Err(ConstructionError::new(
                core,
                ParticipantError::LogAheadOfTerm {
                    log_term: spearhead.term,
                    term: info.term,
                },
            ));
        }

        let logger = logger.new(slog::o!("Role" => "Leader", "Term" => info.term.as_u64()));
        let local = Arc::new(LocalFollower::new(
            logger.new(slog::o!("Peer" => info.id.to_string())),
            info.id.clone(),
            info.term,
            core,
        ));

        // Everything already in our store is durable, so the local follower starts out having
        // acked our spearhead. Nobody else has acked anything yet.
        let mut peers = BTreeMap::new();
        peers.insert(
            info.id.clone(),
            PeerState::new(
                local.clone(),
                logger.new(slog::o!("Peer" => info.id.to_string())),
                spearhead,
                spearhead,
            ),
        );
        for id in config.participants.keys() {
            if let Some(handle) = handles.remove(id) {
                peers.insert(
                    id.clone(),
                    PeerState::new(
                        handle,
                        logger.new(slog::o!("Peer" => id.to_string())),
                        spearhead,
                        TermIndexPair::zero(),
                    ),
                );
            }
        }

        let first_index_of_term = spearhead.index.plus(1);
        let first_entry = PersistingLogEntry::with_meta(
            info.term,
            first_index_of_term,
            LogMetaPayload::FirstEntryOfTerm {
                leader: info.id.clone(),
                participants: config.clone(),
            },
        );
        in_memory_log.append(std::iter::once(Arc::new(InMemoryLogEntry::new(
            first_entry,
            config.wait_for_sync,
        ))));

        slog::info!(
            logger,
            "Leading with {} followers, first index of term {:?}",
            peers.len() - 1,
            first_index_of_term
        );

        let mut pending_configs = VecDeque::new();
        pending_configs.push_back((first_index_of_term, config.clone()));

        Ok(Arc::new(LogLeader {
            logger,
            id: info.id,
            term: info.term,
            first_index_of_term,
            options,
            local,
            state_handle,
            guarded: Mutex::new(GuardedLeaderData {
                in_memory_log,
                followers: peers,
                active_config: config,
                active_config_index: first_index_of_term,
                committed_config: None,
                pending_configs,
                commit_index: LogIndex::zero(),
                largest_common_index: LogIndex::zero(),
                lowest_index_to_keep: LogIndex::zero(),
                release_index: LogIndex::zero(),
                last_quorum: None,
                last_commit_fail_reason: None,
                leadership_established: false,
                wait_for: WaitForQueue::default(),
                last_message_id: info.last_message_id,
                resigned: false,
            }),
        }))
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn term(&self) -> LogTerm {
        self.term
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GuardedLeaderData> {
        self.guarded.lock().expect("LogLeader mutex guard poison")
    }

    /// Appends a user entry to the leader's log and returns its index. Does not wait for, or
    /// start, replication.
    pub fn insert(&self, payload: LogPayload, wait_for_sync: bool) -> Result<LogIndex, ParticipantError> {
        let mut data = self.lock();
        if data.resigned {
            return Err(ParticipantError::Resigned(self.term));
        }

        let index = data.in_memory_log.next_index();
        let entry = PersistingLogEntry::with_payload(self.term, index, payload);
        data.in_memory_log
            .append(std::iter::once(Arc::new(InMemoryLogEntry::new(entry, wait_for_sync))));
        Ok(index)
    }

    /// Sends a request to every follower that is idle and behind.
    pub fn trigger_async_replication(self: &Arc<Self>) {
        let requests = {
            let mut data = self.lock();
            if data.resigned {
                return;
            }
            data.prepare_requests(&self.id, self.term, &self.options, Instant::now())
        };

        for (follower, request) in requests {
            let leader = Arc::clone(self);
            tokio::spawn(async move { leader.send_append_entries(follower, request).await });
        }
    }

    async fn send_append_entries(self: Arc<Self>, follower: Arc<dyn AbstractFollower>, request: AppendEntriesRequest) {
        let peer_id = follower.participant_id().clone();
        let message_id = request.message_id;
        slog::debug!(
            self.logger,
            "Sending AppendEntries {:?} to {:?}: prev {:?}, {} entries, commit {:?}",
            message_id,
            peer_id,
            request.prev_log_entry,
            request.entries.len(),
            request.leader_commit
        );

        let timeout = self.options.append_entries_timeout;
        let result = match tokio::time::timeout(timeout, follower.append_entries(request)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => AppendEntriesResult::with_communication_error(self.term, message_id, e.to_string()),
            Err(_) => AppendEntriesResult::with_communication_error(
                self.term,
                message_id,
                format!("No response within {:?}", timeout),
            ),
        };

        self.handle_append_entries_result(&peer_id, message_id, result);
    }

    fn handle_append_entries_result(self: &Arc<Self>, peer_id: &ParticipantId, message_id: MessageId, result: AppendEntriesResult) {
        let (update, commit_update) = {
            let mut guard = self.lock();
            let data = &mut *guard;
            if data.resigned {
                return;
            }
            let peer = match data.followers.get_mut(peer_id) {
                Some(peer) => peer,
                // Removed from the config while the request was in flight.
                None => return,
            };

            let update = peer.handle_response(message_id, result, &data.in_memory_log, &self.options);
            let commit_update = match update {
                PeerStateUpdate::Success => data.check_commit_index(&self.logger, self.term, self.first_index_of_term),
                _ => CommitUpdate::default(),
            };
            (update, commit_update)
        };

        commit_update.apply(self);

        match update {
            PeerStateUpdate::Stale => {}
            PeerStateUpdate::Success | PeerStateUpdate::Rewound => self.trigger_async_replication(),
            PeerStateUpdate::Backoff(delay) => {
                let leader = Arc::downgrade(self);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(leader) = leader.upgrade() {
                        leader.trigger_async_replication();
                    }
                });
            }
        }
    }

    /// Resolves once `index` is committed, or fails once this leader resigns.
    pub fn wait_for(&self, index: LogIndex) -> impl Future<Output = WaitForOutcome> + Send + 'static {
        let term = self.term;
        let registration = {
            let mut data = self.lock();
            if data.resigned {
                Registration::Ready(Err(WaitForError::LeaderResigned(term)))
            } else if data.commit_index >= index {
                Registration::Ready(Ok(WaitForResult {
                    commit_index: data.commit_index,
                    quorum: data.last_quorum.clone(),
                }))
            } else {
                Registration::Pending(data.wait_for.register(index))
            }
        };

        async move {
            match registration {
                Registration::Ready(outcome) => outcome,
                Registration::Pending(rx) => rx.await.unwrap_or(Err(WaitForError::LeaderResigned(term))),
            }
        }
    }

    /// Resolves once a quorum has acked this leader's first entry of its term.
    pub fn wait_for_leadership(&self) -> impl Future<Output = WaitForOutcome> + Send + 'static {
        self.wait_for(self.first_index_of_term)
    }

    pub fn is_leadership_established(&self) -> bool {
        self.lock().leadership_established
    }

    pub fn get_commit_index(&self) -> LogIndex {
        self.lock().commit_index
    }

    pub(crate) fn last_message_id(&self) -> MessageId {
        self.lock().last_message_id
    }

    /// Switches to `config` if its generation is newer than the active one, and returns the
    /// index of the entry that carries the active config. `additional_followers` must provide a
    /// handle for every participant the leader doesn't know yet.
    pub fn update_participants_config(
        self: &Arc<Self>,
        config: Arc<ParticipantsConfig>,
        additional_followers: Vec<Arc<dyn AbstractFollower>>,
    ) -> Result<LogIndex, ParticipantError> {
        let (index, commit_update) = {
            let mut guard = self.lock();
            let data = &mut *guard;
            if data.resigned {
                return Err(ParticipantError::Resigned(self.term));
            }
            if config.generation <= data.active_config.generation {
                slog::debug!(
                    self.logger,
                    "Ignoring config generation {}, active is {}",
                    config.generation,
                    data.active_config.generation
                );
                return Ok(data.active_config_index);
            }
            config.validate()?;
            if !config.contains(&self.id) {
                return Err(ParticipantError::NotInConfig(self.id.clone()));
            }

            let mut handles: BTreeMap<ParticipantId, Arc<dyn AbstractFollower>> = additional_followers
                .into_iter()
                .map(|f| (f.participant_id().clone(), f))
                .collect();
            if let Some(missing) = config
                .participants
                .keys()
                .find(|id| !data.followers.contains_key(*id) && !handles.contains_key(*id))
            {
                return Err(ParticipantError::MissingFollower(missing.clone()));
            }

            let spearhead = data.in_memory_log.last_term_index_pair();
            for id in config.participants.keys() {
                if data.followers.contains_key(id) {
                    continue;
                }
                if let Some(handle) = handles.remove(id) {
                    let logger = self.logger.new(slog::o!("Peer" => id.to_string()));
                    data.followers
                        .insert(id.clone(), PeerState::new(handle, logger, spearhead, TermIndexPair::zero()));
                }
            }
            data.followers.retain(|id, _| config.contains(id));

            let index = data.in_memory_log.next_index();
            let entry = PersistingLogEntry::with_meta(
                self.term,
                index,
                LogMetaPayload::UpdateParticipantsConfig {
                    participants: config.clone(),
                },
            );
            data.in_memory_log
                .append(std::iter::once(Arc::new(InMemoryLogEntry::new(entry, config.wait_for_sync))));
            slog::info!(
                self.logger,
                "Switched to config generation {} at {:?}: {:?}",
                config.generation,
                index,
                config.participants
            );

            data.active_config = config.clone();
            data.active_config_index = index;
            data.pending_configs.push_back((index, config));

            let commit_update = data.check_commit_index(&self.logger, self.term, self.first_index_of_term);
            (index, commit_update)
        };

        commit_update.apply(self);
        self.trigger_async_replication();
        Ok(index)
    }

    /// Allows entries up to `index` to be compacted once every participant has them.
    pub fn release(self: &Arc<Self>, index: LogIndex) -> Result<(), ParticipantError> {
        {
            let mut data = self.lock();
            if data.resigned {
                return Err(ParticipantError::Resigned(self.term));
            }
            if index > data.release_index {
                data.release_index = index;
                data.check_compaction(&self.logger);
            }
        }

        self.trigger_async_replication();
        Ok(())
    }

    /// Gives up the log core. Pending waiters are failed when the returned action runs.
    pub async fn resign(&self) -> Result<(LogCore, DeferredAction), ParticipantError> {
        let waiters = {
            let mut data = self.lock();
            if data.resigned {
                return Err(ParticipantError::Resigned(self.term));
            }
            data.resigned = true;
            data.wait_for.take_all()
        };
        slog::info!(self.logger, "Resigned with {} pending waiters", waiters.len());

        let term = self.term;
        let action = DeferredAction::new(move || resolve_all(waiters, Err(WaitForError::LeaderResigned(term))));

        // Waits for a write that may still be in progress.
        let mut core = self.local.resign().await.ok_or(ParticipantError::Resigned(term))?;

        // Followers may hold entries our store doesn't have yet. A leader rebuilt in this term
        // must not hand out their indexes again.
        let persisted = match core.load_in_memory_log() {
            Ok(log) => log.last_index(),
            Err(e) => {
                slog::error!(self.logger, "Failed to read log on resign: {:?}", e);
                return Ok((core, action));
            }
        };
        let unpersisted: Vec<PersistingLogEntry> = {
            let data = self.lock();
            data.in_memory_log
                .slice(persisted.plus(1), data.in_memory_log.next_index())
                .iter()
                .map(|e| e.entry().clone())
                .collect()
        };
        if !unpersisted.is_empty() {
            slog::info!(self.logger, "Persisting {} entries before handing back the log", unpersisted.len());
            if let Err(e) = core.insert(unpersisted, false).await {
                slog::error!(self.logger, "Failed to persist entries on resign: {:?}", e);
            }
        }

        Ok((core, action))
    }

    pub fn get_status(&self) -> LeaderStatus {
        let data = self.lock();
        let follower: BTreeMap<ParticipantId, FollowerStatistics> = data
            .followers
            .iter()
            .map(|(id, peer)| (id.clone(), peer.statistics()))
            .collect();

        LeaderStatus {
            local: LocalStatus {
                spear_head: data.in_memory_log.last_term_index_pair(),
                commit_index: data.commit_index,
                first_index: data.in_memory_log.first_index(),
            },
            term: self.term,
            follower,
            active_participants_config: data.active_config.clone(),
            committed_participants_config: data.committed_config.clone(),
            largest_common_index: data.largest_common_index,
            lowest_index_to_keep: data.lowest_index_to_keep,
            leadership_established: data.leadership_established,
            last_commit_fail_reason: data.last_commit_fail_reason.clone(),
        }
    }

    /// Committed user entries from `from` on.
    pub fn get_committed_log_iterator(&self, from: LogIndex) -> LogViewIterator {
        let data = self.lock();
        data.in_memory_log.get_view_iterator(from, data.commit_index.plus(1))
    }

    pub fn copy_in_memory_log(&self) -> InMemoryLog {
        self.lock().in_memory_log.clone()
    }
}

impl GuardedLeaderData {
    fn prepare_requests(
        &mut self,
        leader_id: &ParticipantId,
        term: LogTerm,
        options: &ValidatedLogOptions,
        now: Instant,
    ) -> Vec<(Arc<dyn AbstractFollower>, AppendEntriesRequest)> {
        let ctx = ReplicationContext {
            leader_id: leader_id.clone(),
            term,
            commit_index: self.commit_index,
            largest_common_index: self.largest_common_index,
            lowest_index_to_keep: self.lowest_index_to_keep,
            wait_for_sync: self.active_config.wait_for_sync,
            max_entries_per_batch: options.max_entries_per_batch,
        };
        let spearhead = self.in_memory_log.last_term_index_pair();

        let mut requests = vec![];
        for peer in self.followers.values_mut() {
            if !peer.needs_request(spearhead, &ctx, now) {
                continue;
            }
            self.last_message_id = self.last_message_id.next();
            let request = peer.prepare_request(&ctx, &self.in_memory_log, self.last_message_id, now);
            requests.push((peer.follower().clone(), request));
        }
        requests
    }

    fn quorum_states(&self) -> Vec<ParticipantQuorumState> {
        self.active_config
            .participants
            .iter()
            .filter_map(|(id, flags)| {
                self.followers.get(id).map(|peer| ParticipantQuorumState {
                    id: id.clone(),
                    last_acked_index: peer.last_acked_entry().index,
                    flags: *flags,
                })
            })
            .collect()
    }

    fn check_commit_index(&mut self, logger: &slog::Logger, term: LogTerm, first_index_of_term: LogIndex) -> CommitUpdate {
        let participants = self.quorum_states();
        let computation = calculate_commit_index(
            &participants,
            self.active_config.effective_write_concern,
            self.commit_index,
            first_index_of_term,
            self.in_memory_log.last_index(),
        );
        self.last_commit_fail_reason = computation.fail_reason;

        let mut update = CommitUpdate::default();
        if computation.commit_index > self.commit_index {
            slog::debug!(
                logger,
                "Commit index {:?} -> {:?}, quorum {:?}",
                self.commit_index,
                computation.commit_index,
                computation.quorum
            );
            self.commit_index = computation.commit_index;

            let quorum = Arc::new(QuorumData {
                index: computation.commit_index,
                term,
                quorum: computation.quorum,
            });
            self.last_quorum = Some(quorum.clone());
            update.new_commit_index = Some(self.commit_index);
            update.resolved = self.wait_for.take_up_to(self.commit_index);
            update.result = Some(WaitForResult {
                commit_index: self.commit_index,
                quorum: Some(quorum),
            });

            while let Some((index, config)) = self.pending_configs.front() {
                if *index > self.commit_index {
                    break;
                }
                self.committed_config = Some(config.clone());
                self.pending_configs.pop_front();
            }

            if !self.leadership_established && self.commit_index >= first_index_of_term {
                slog::info!(logger, "Leadership established at {:?}", self.commit_index);
                self.leadership_established = true;
                update.leadership_established = true;
            }
        }

        let largest_common_index =
            calculate_largest_common_index(&participants, self.largest_common_index, self.commit_index);
        if largest_common_index > self.largest_common_index {
            self.largest_common_index = largest_common_index;
            self.check_compaction(logger);
        }

        update
    }

    /// Compacts up to the released index, but never past what every participant has.
    fn check_compaction(&mut self, logger: &slog::Logger) {
        let lowest_index_to_keep = self.release_index.min(self.largest_common_index);
        if lowest_index_to_keep > self.lowest_index_to_keep {
            slog::debug!(logger, "Compacting log below {:?}", lowest_index_to_keep);
            self.lowest_index_to_keep = lowest_index_to_keep;
            self.in_memory_log.remove_front(lowest_index_to_keep);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::InMemoryLogStore;
    use crate::replica::{AppendEntriesErrorReason, FollowerTermInfo, LogFollower};
    use crate::test_utils::{config_of, test_logger, wait_until, DelayedFollower, DelayedFollowerQueue};
    use crate::types::ParticipantFlags;
    use tokio::time::Duration;

    fn leader_info(config: ParticipantsConfig) -> LeaderTermInfo {
        LeaderTermInfo {
            id: "leader".into(),
            term: LogTerm::new(1),
            config: Arc::new(config),
            last_message_id: MessageId::default(),
        }
    }

    fn construct_leader(
        config: ParticipantsConfig,
        followers: Vec<Arc<dyn AbstractFollower>>,
    ) -> (Arc<LogLeader>, InMemoryLogStore) {
        let store = InMemoryLogStore::new();
        let leader = LogLeader::construct(
            test_logger(),
            leader_info(config),
            LogCore::new(Box::new(store.clone())),
            followers,
            ValidatedLogOptions::default(),
            None,
        )
        .unwrap();
        (leader, store)
    }

    fn delayed(id: &str) -> (Arc<dyn AbstractFollower>, DelayedFollowerQueue) {
        let (follower, queue) = DelayedFollower::new(id);
        (Arc::new(follower), queue)
    }

    fn real_follower(id: &str) -> Arc<LogFollower> {
        LogFollower::construct(
            test_logger(),
            FollowerTermInfo {
                id: id.into(),
                term: LogTerm::new(1),
                leader: Some("leader".into()),
            },
            LogCore::new(Box::new(InMemoryLogStore::new())),
            None,
        )
        .unwrap()
    }

    async fn timeout<F: Future>(f: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(5), f)
            .await
            .expect("test timed out")
    }

    #[tokio::test]
    async fn first_entry_is_meta() {
        let (f1, _q1) = delayed("f1");
        let (leader, _store) = construct_leader(config_of(&["leader", "f1"], 2), vec![f1]);

        let log = leader.copy_in_memory_log();
        assert_eq!(log.len(), 1);
        let first = log.get_entry_by_index(LogIndex::new(1)).unwrap();
        match first.entry().meta() {
            Some(LogMetaPayload::FirstEntryOfTerm { leader: id, .. }) => assert_eq!(id, &ParticipantId::from("leader")),
            other => panic!("Expected first entry of term, got {:?}", other),
        }
        assert!(!leader.is_leadership_established());
    }

    #[tokio::test]
    async fn commits_after_follower_acks() {
        let (f1, q1) = delayed("f1");
        let (leader, store) = construct_leader(config_of(&["leader", "f1"], 2), vec![f1]);

        let index = leader.insert(LogPayload::create_from_string("x"), false).unwrap();
        assert_eq!(index, LogIndex::new(2));
        let waiter = leader.wait_for(index);
        leader.trigger_async_replication();

        let follower = real_follower("f1");
        timeout(q1.wait_for_request()).await;
        // The local follower persisted, but one ack isn't a quorum.
        wait_until(|| store.len() == 2).await;
        assert_eq!(leader.get_commit_index(), LogIndex::zero());

        for pending in q1.take_pending() {
            pending.respond_with(&follower).await;
        }

        let result = timeout(waiter).await.unwrap();
        assert_eq!(result.commit_index, index);
        let quorum = result.quorum.unwrap();
        assert_eq!(quorum.quorum, vec![ParticipantId::from("f1"), ParticipantId::from("leader")]);
        assert!(leader.is_leadership_established());
        assert!(leader.get_status().committed_participants_config.is_some());
    }

    #[tokio::test]
    async fn forced_follower_blocks_commit() {
        let config = config_of(&["leader", "fast", "slow"], 2).with_flags(&"slow".into(), ParticipantFlags::forced());
        let (fast, fast_queue) = delayed("fast");
        let (slow, slow_queue) = delayed("slow");
        let (leader, _store) = construct_leader(config, vec![fast, slow]);

        let index = leader.insert(LogPayload::create_from_string("x"), false).unwrap();
        leader.trigger_async_replication();

        let fast_follower = real_follower("fast");
        timeout(fast_queue.wait_for_request()).await;
        for pending in fast_queue.take_pending() {
            pending.respond_with(&fast_follower).await;
        }
        timeout(wait_until(|| leader.get_status().follower["fast"].spear_head.index == index)).await;
        assert_eq!(leader.get_commit_index(), LogIndex::zero());
        assert!(matches!(
            leader.get_status().last_commit_fail_reason,
            Some(CommitFailReason::ForcedParticipantNotInQuorum { .. })
        ));

        let slow_follower = real_follower("slow");
        timeout(slow_queue.wait_for_request()).await;
        for pending in slow_queue.take_pending() {
            pending.respond_with(&slow_follower).await;
        }
        let result = timeout(leader.wait_for(index)).await.unwrap();
        assert_eq!(result.commit_index, index);
    }

    #[tokio::test]
    async fn errors_are_retried() {
        let (f1, q1) = delayed("f1");
        let (leader, _store) = construct_leader(config_of(&["leader", "f1"], 2), vec![f1]);
        leader.trigger_async_replication();

        timeout(q1.wait_for_request()).await;
        for pending in q1.take_pending() {
            let id = pending.request.message_id;
            pending.respond(Ok(AppendEntriesResult::with_rejection(
                LogTerm::new(1),
                id,
                AppendEntriesErrorReason::PersistenceFailure,
            )));
        }
        timeout(wait_until(|| {
            leader.get_status().follower["f1"].last_error_reason == AppendEntriesErrorReason::PersistenceFailure
        }))
        .await;

        // The retry comes after the backoff.
        let follower = real_follower("f1");
        timeout(q1.wait_for_request()).await;
        for pending in q1.take_pending() {
            pending.respond_with(&follower).await;
        }
        timeout(leader.wait_for_leadership()).await.unwrap();
        assert_eq!(leader.get_status().follower["f1"].num_errors_in_a_row, 0);
    }

    #[tokio::test]
    async fn resign_fails_waiters_and_returns_core() {
        let (f1, _q1) = delayed("f1");
        let (leader, _store) = construct_leader(config_of(&["leader", "f1"], 2), vec![f1]);
        let index = leader.insert(LogPayload::create_from_string("x"), false).unwrap();
        let waiter = leader.wait_for(index);

        let (core, action) = leader.resign().await.unwrap();
        action.fire();
        assert_eq!(timeout(waiter).await.unwrap_err(), WaitForError::LeaderResigned(LogTerm::new(1)));

        assert!(matches!(
            leader.insert(LogPayload::create_from_string("y"), false),
            Err(ParticipantError::Resigned(_))
        ));
        assert!(leader.resign().await.is_err());
        assert!(leader.wait_for(index).await.is_err());

        // Nothing was replicated, but the handed back core has the whole log.
        let log = core.load_in_memory_log().unwrap();
        assert_eq!(log.last_term_index_pair(), TermIndexPair::from_raw(1, 2));
    }

    #[tokio::test]
    async fn stale_config_generation_is_ignored() {
        let (leader, _store) = construct_leader(config_of(&["leader"], 1), vec![]);
        leader.trigger_async_replication();
        timeout(leader.wait_for_leadership()).await.unwrap();

        let same = Arc::new(config_of(&["leader"], 1));
        assert_eq!(leader.update_participants_config(same, vec![]).unwrap(), LogIndex::new(1));

        let mut missing = config_of(&["leader", "f1"], 1);
        missing.generation = 2;
        assert!(matches!(
            leader.update_participants_config(Arc::new(missing), vec![]),
            Err(ParticipantError::MissingFollower(_))
        ));

        let mut next = config_of(&["leader"], 1);
        next.generation = 2;
        let index = leader.update_participants_config(Arc::new(next), vec![]).unwrap();
        assert_eq!(index, LogIndex::new(2));
        timeout(leader.wait_for(index)).await.unwrap();
        assert_eq!(leader.get_status().committed_participants_config.unwrap().generation, 2);
    }

    #[tokio::test]
    async fn construction_fails_without_handles() {
        let store = InMemoryLogStore::new();
        let result = LogLeader::construct(
            test_logger(),
            leader_info(config_of(&["leader", "f1"], 2)),
            LogCore::new(Box::new(store)),
            vec![],
            ValidatedLogOptions::default(),
            None,
        );
        match result {
            Err(e) => assert!(matches!(e.error, ParticipantError::MissingFollower(_))),
            Ok(_) => panic!("Leader built without follower handle"),
        }
    }

    #[tokio::test]
    async fn release_compacts_up_to_common_index() {
        let (leader, store) = construct_leader(config_of(&["leader"], 1), vec![]);
        let mut last = LogIndex::zero();
        for i in 0..5 {
            last = leader
                .insert(LogPayload::create_from_string(&format!("{}", i)), false)
                .unwrap();
        }
        leader.trigger_async_replication();
        timeout(leader.wait_for(last)).await.unwrap();
        timeout(wait_until(|| leader.get_status().largest_common_index == last)).await;

        leader.release(LogIndex::new(4)).unwrap();
        let status = leader.get_status();
        assert_eq!(status.lowest_index_to_keep, LogIndex::new(4));
        assert_eq!(status.local.first_index, LogIndex::new(4));
        timeout(wait_until(|| store.first_index() == Some(LogIndex::new(4)))).await;

        let committed: Vec<_> = leader
            .get_committed_log_iterator(LogIndex::zero())
            .map(|v| v.log_index().as_u64())
            .collect();
        assert_eq!(committed, vec![4, 5, 6]);
    }
}
