use crate::commitlog::LogCore;
use crate::replica::{AbstractFollower, AppendEntriesErrorReason, AppendEntriesRequest, AppendEntriesResult, FollowerCallError};
use crate::types::{LogIndex, LogTerm, ParticipantId};
use tokio::sync::Mutex;

/// LocalFollower is the leader's own durable copy of the log. The leader treats it like any other
/// follower: it counts toward the quorum only once an entry has been written to the store.
pub(crate) struct LocalFollower {
    logger: slog::Logger,
    id: ParticipantId,
    term: LogTerm,
    guarded: Mutex<GuardedLocalData>,
}

struct GuardedLocalData {
    core: Option<LogCore>,
    lowest_index_to_keep: LogIndex,
}

impl LocalFollower {
    pub(crate) fn new(logger: slog::Logger, id: ParticipantId, term: LogTerm, core: LogCore) -> Self {
        LocalFollower {
            logger,
            id,
            term,
            guarded: Mutex::new(GuardedLocalData {
                core: Some(core),
                lowest_index_to_keep: LogIndex::zero(),
            }),
        }
    }

    /// Takes the core back once any write in progress finished. Returns None if it was already
    /// taken.
    pub(crate) async fn resign(&self) -> Option<LogCore> {
        self.guarded.lock().await.core.take()
    }
}

#[async_trait::async_trait]
impl AbstractFollower for LocalFollower {
    fn participant_id(&self) -> &ParticipantId {
        &self.id
    }

    async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, FollowerCallError> {
        let mut guard = self.guarded.lock().await;
        let data = &mut *guard;
        let core = match data.core.as_mut() {
            Some(core) => core,
            None => {
                return Ok(AppendEntriesResult::with_rejection(
                    self.term,
                    request.message_id,
                    AppendEntriesErrorReason::LostLogCore,
                ))
            }
        };

        if !request.entries.is_empty() {
            let wait_for_sync = request.wait_for_sync || request.entries.iter().any(|e| e.wait_for_sync());
            let entries = request.entries.iter().map(|e| e.entry().clone()).collect();
            if let Err(e) = core.insert(entries, wait_for_sync).await {
                slog::error!(self.logger, "Failed to persist {} entries: {:?}", request.entries.len(), e);
                return Ok(AppendEntriesResult::with_persistence_error(
                    self.term,
                    request.message_id,
                    &e,
                ));
            }
        }

        if request.lowest_index_to_keep > data.lowest_index_to_keep {
            match core.remove_front(request.lowest_index_to_keep).await {
                Ok(()) => data.lowest_index_to_keep = request.lowest_index_to_keep,
                // Not fatal, the store just keeps a longer prefix.
                Err(e) => slog::warn!(self.logger, "Failed to compact local log: {:?}", e),
            }
        }

        Ok(AppendEntriesResult::with_ok(self.term, request.message_id))
    }
}
