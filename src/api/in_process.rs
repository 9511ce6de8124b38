use crate::api::{FollowerHandleFactory, ReplicatedLog};
use crate::replica::{AbstractFollower, AppendEntriesRequest, AppendEntriesResult, FollowerCallError};
use crate::types::ParticipantId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

/// InProcessNetwork connects replicated logs living in the same process. Requests go straight
/// to the target log's current follower.
///
/// Partitioning a participant cuts it off in both directions: requests it sends as leader fail
/// just like requests sent to it.
#[derive(Clone, Default)]
pub struct InProcessNetwork {
    inner: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    logs: HashMap<ParticipantId, Weak<ReplicatedLog>>,
    partitioned: HashSet<ParticipantId>,
}

impl InProcessNetwork {
    pub fn new() -> Self {
        InProcessNetwork::default()
    }

    pub fn register(&self, log: &Arc<ReplicatedLog>) {
        self.lock()
            .logs
            .insert(log.participant_id().clone(), Arc::downgrade(log));
    }

    pub fn partition(&self, id: &ParticipantId) {
        self.lock().partitioned.insert(id.clone());
    }

    pub fn heal(&self, id: &ParticipantId) {
        self.lock().partitioned.remove(id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        self.inner.lock().expect("InProcessNetwork mutex guard poison")
    }

    fn route(&self, from: &ParticipantId, to: &ParticipantId) -> Result<Arc<ReplicatedLog>, FollowerCallError> {
        let state = self.lock();
        if state.partitioned.contains(from) || state.partitioned.contains(to) {
            return Err(FollowerCallError::Unreachable(to.clone()));
        }
        state
            .logs
            .get(to)
            .and_then(Weak::upgrade)
            .ok_or_else(|| FollowerCallError::Unreachable(to.clone()))
    }
}

impl FollowerHandleFactory for InProcessNetwork {
    fn follower_handle(&self, id: &ParticipantId) -> Arc<dyn AbstractFollower> {
        Arc::new(InProcessFollower {
            id: id.clone(),
            network: self.clone(),
        })
    }
}

struct InProcessFollower {
    id: ParticipantId,
    network: InProcessNetwork,
}

#[async_trait::async_trait]
impl AbstractFollower for InProcessFollower {
    fn participant_id(&self) -> &ParticipantId {
        &self.id
    }

    async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, FollowerCallError> {
        let leader_id = request.leader_id.clone();
        let target = self.network.route(&leader_id, &self.id)?;
        let result = target.append_entries(request).await?;

        // A partition that started while the request was handled loses the response.
        self.network.route(&leader_id, &self.id)?;
        Ok(result)
    }
}
