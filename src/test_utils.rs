use crate::api::ReplicatedStateHandle;
use crate::replica::{AbstractFollower, AppendEntriesRequest, AppendEntriesResult, FollowerCallError, LogFollower, LogLeader};
use crate::types::{
    InMemoryLogEntry, LogIndex, LogPayload, LogTerm, ParticipantId, ParticipantsConfig, PersistingLogEntry,
};
use slog::Drain;
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::Duration;

pub(crate) fn test_logger() -> slog::Logger {
    let decorator = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();

    slog::Logger::root(drain, slog::o!())
}

/// User entries for `indexes`, all in `term`.
pub(crate) fn payload_entries(term: u64, indexes: RangeInclusive<u64>) -> Vec<Arc<InMemoryLogEntry>> {
    indexes
        .map(|i| {
            let entry = PersistingLogEntry::with_payload(
                LogTerm::new(term),
                LogIndex::new(i),
                LogPayload::create_from_string(&format!("entry-{}-{}", term, i)),
            );
            Arc::new(InMemoryLogEntry::new(entry, false))
        })
        .collect()
}

pub(crate) fn config_of(ids: &[&str], write_concern: usize) -> ParticipantsConfig {
    ParticipantsConfig::new(1, ids.iter().map(|id| ParticipantId::from(*id)), write_concern)
}

/// Polls `condition` until it holds. Panics after a few seconds.
pub(crate) async fn wait_until<F: FnMut() -> bool>(mut condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("Condition not reached in time");
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// A request a DelayedFollower received and hasn't answered yet.
pub(crate) struct PendingRequest {
    pub request: AppendEntriesRequest,
    responder: oneshot::Sender<Result<AppendEntriesResult, FollowerCallError>>,
}

impl PendingRequest {
    pub(crate) fn respond(self, result: Result<AppendEntriesResult, FollowerCallError>) {
        let _ = self.responder.send(result);
    }

    /// Lets a real follower handle the request and passes its answer back.
    pub(crate) async fn respond_with(self, follower: &LogFollower) {
        let result = follower.append_entries(self.request.clone()).await;
        self.respond(Ok(result));
    }
}

#[derive(Clone)]
pub(crate) struct DelayedFollowerQueue {
    pending: Arc<Mutex<VecDeque<PendingRequest>>>,
}

impl DelayedFollowerQueue {
    pub(crate) fn take_pending(&self) -> Vec<PendingRequest> {
        self.pending
            .lock()
            .expect("DelayedFollowerQueue mutex guard poison")
            .drain(..)
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().expect("DelayedFollowerQueue mutex guard poison").len()
    }

    pub(crate) async fn wait_for_request(&self) {
        wait_until(|| self.len() > 0).await
    }
}

/// A follower that holds on to every request until the test answers it.
pub(crate) struct DelayedFollower {
    id: ParticipantId,
    queue: DelayedFollowerQueue,
}

impl DelayedFollower {
    pub(crate) fn new(id: &str) -> (DelayedFollower, DelayedFollowerQueue) {
        let queue = DelayedFollowerQueue {
            pending: Arc::new(Mutex::new(VecDeque::new())),
        };
        let follower = DelayedFollower {
            id: id.into(),
            queue: queue.clone(),
        };
        (follower, queue)
    }
}

#[async_trait::async_trait]
impl AbstractFollower for DelayedFollower {
    fn participant_id(&self) -> &ParticipantId {
        &self.id
    }

    async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, FollowerCallError> {
        let (tx, rx) = oneshot::channel();
        self.queue
            .pending
            .lock()
            .expect("DelayedFollowerQueue mutex guard poison")
            .push_back(PendingRequest {
                request,
                responder: tx,
            });

        rx.await
            .unwrap_or_else(|_| Err(FollowerCallError::Unreachable(self.id.clone())))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum StateEvent {
    LeadershipEstablished(LogTerm),
    BecomeFollower(LogTerm),
    AcquireSnapshot(ParticipantId, LogIndex),
    CommitIndex(LogIndex),
    DropEntries(LogIndex),
    Resigned,
}

#[derive(Default)]
pub(crate) struct RecordingStateHandle {
    events: Mutex<Vec<StateEvent>>,
}

impl RecordingStateHandle {
    pub(crate) fn new() -> Self {
        RecordingStateHandle::default()
    }

    pub(crate) fn events(&self) -> Vec<StateEvent> {
        self.events.lock().expect("RecordingStateHandle mutex guard poison").clone()
    }

    fn record(&self, event: StateEvent) {
        self.events
            .lock()
            .expect("RecordingStateHandle mutex guard poison")
            .push(event);
    }
}

impl ReplicatedStateHandle for RecordingStateHandle {
    fn leadership_established(&self, leader: Arc<LogLeader>) {
        self.record(StateEvent::LeadershipEstablished(leader.term()));
    }

    fn become_follower(&self, follower: Arc<LogFollower>) {
        self.record(StateEvent::BecomeFollower(follower.term()));
    }

    fn acquire_snapshot(&self, leader: &ParticipantId, index: LogIndex) {
        self.record(StateEvent::AcquireSnapshot(leader.clone(), index));
    }

    fn update_commit_index(&self, index: LogIndex) {
        self.record(StateEvent::CommitIndex(index));
    }

    fn drop_entries(&self, from: LogIndex) {
        self.record(StateEvent::DropEntries(from));
    }

    fn resign_current_state(&self) {
        self.record(StateEvent::Resigned);
    }
}
