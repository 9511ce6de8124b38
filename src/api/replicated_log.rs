use crate::api::{ParticipantContext, ParticipantsFactory, ReplicatedStateHandle};
use crate::commitlog::{LogCore, LogMetadata, LogStoreError};
use crate::replica::{
    AbstractFollower, AppendEntriesRequest, AppendEntriesResult, DeferredAction, FollowerCallError, FollowerTermInfo,
    LeaderTermInfo, LogFollower, LogLeader, LogStatus, MessageId, ParticipantError, WaitForError, WaitForResult,
};
use crate::types::{InvalidParticipantsConfig, LogIndex, LogPayload, LogTerm, ParticipantId, ParticipantsConfig};
use std::sync::Arc;
use tokio::sync::Mutex;

/// The term a log should be in, and who leads it. The leader may not be known yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogTermSpec {
    pub term: LogTerm,
    pub leader: Option<ParticipantId>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicatedLogError {
    #[error("Term {term:?} is older than current term {current:?}")]
    StaleTerm { term: LogTerm, current: LogTerm },
    #[error("Term {term:?} already has leader {current:?}, refusing {requested:?}")]
    ConflictingLeader {
        term: LogTerm,
        current: Option<ParticipantId>,
        requested: Option<ParticipantId>,
    },
    #[error("Log was dropped")]
    LogDropped,
    #[error("Log is not configured yet")]
    Unconfigured,
    #[error("Log core was lost while switching roles")]
    LogCoreLost,
    #[error("A state handle is already connected")]
    AlreadyConnected,
    #[error("Illegal options: {0}")]
    IllegalOptions(&'static str),
    #[error(transparent)]
    InvalidConfig(#[from] InvalidParticipantsConfig),
    #[error(transparent)]
    Store(#[from] LogStoreError),
    #[error(transparent)]
    Participant(#[from] ParticipantError),
    #[error(transparent)]
    WaitFor(#[from] WaitForError),
}

#[derive(Debug, thiserror::Error)]
pub enum InsertError {
    #[error("Not the leader, insert at {leader}")]
    LeaderRedirect { leader: ParticipantId },
    #[error("Not the leader, and the leader is not known")]
    NoLeader,
    #[error("Log is not configured yet")]
    Unconfigured,
    #[error("Log was dropped")]
    LogDropped,
    #[error(transparent)]
    Participant(#[from] ParticipantError),
}

enum Participant {
    Unconfigured(LogCore),
    Leader(Arc<LogLeader>),
    Follower(Arc<LogFollower>),
    Dropped,
}

#[derive(Clone)]
enum Role {
    Leader(Arc<LogLeader>),
    Follower(Arc<LogFollower>),
}

/// Outcome of a role change, applied after the lock is released.
#[must_use]
struct RoleChange {
    resigned: DeferredAction,
    // Handle of the role that resigned, if it had one.
    resigned_handle: Option<Arc<dyn ReplicatedStateHandle>>,
    new_role: Option<Role>,
    handle: Option<Arc<dyn ReplicatedStateHandle>>,
    // The old role is gone even if building the new one failed.
    error: Option<ReplicatedLogError>,
}

impl RoleChange {
    fn apply(self) -> Result<(), ReplicatedLogError> {
        self.resigned.fire();
        if let Some(handle) = self.resigned_handle {
            handle.resign_current_state();
        }
        match (self.new_role, self.handle) {
            (Some(Role::Leader(leader)), _) => leader.trigger_async_replication(),
            (Some(Role::Follower(follower)), Some(handle)) => handle.become_follower(follower),
            (Some(Role::Follower(_)), None) | (None, _) => {}
        }

        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// ReplicatedLog owns one participant's log and plays whatever role the current term assigns it.
///
/// Each role change resigns the old leader or follower, takes back its log core and builds the
/// new role on top of it.
pub struct ReplicatedLog {
    logger: slog::Logger,
    id: ParticipantId,
    factory: Arc<dyn ParticipantsFactory>,
    // Held across role changes, which await the old role's resignation.
    guarded: Mutex<GuardedLogData>,
}

struct GuardedLogData {
    participant: Participant,
    state_handle: Option<Arc<dyn ReplicatedStateHandle>>,
    term_spec: Option<LogTermSpec>,
    config: Option<Arc<ParticipantsConfig>>,
    // Lowest term we accept, from the store metadata and every config since.
    persisted_term: LogTerm,
    last_message_id: MessageId,
}

impl ReplicatedLog {
    pub fn new(
        logger: slog::Logger,
        id: ParticipantId,
        core: LogCore,
        factory: Arc<dyn ParticipantsFactory>,
    ) -> Result<ReplicatedLog, ReplicatedLogError> {
        let logger = logger.new(slog::o!("ParticipantId" => id.to_string()));
        let metadata = core.read_metadata()?;
        let persisted_term = metadata.as_ref().map(|m| m.term).unwrap_or_default();
        slog::info!(logger, "Opened log with metadata {:?}", metadata);

        Ok(ReplicatedLog {
            logger,
            id,
            factory,
            guarded: Mutex::new(GuardedLogData {
                participant: Participant::Unconfigured(core),
                state_handle: None,
                term_spec: None,
                config: None,
                persisted_term,
                last_message_id: MessageId::default(),
            }),
        })
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.id
    }

    /// Moves the log to `term_spec` with `config`.
    ///
    /// Within the current term only two changes are accepted: a leader that became known, and a
    /// newer config generation on the leader. Anything else needs a new term.
    pub async fn update_config(
        &self,
        term_spec: LogTermSpec,
        config: ParticipantsConfig,
    ) -> Result<(), ReplicatedLogError> {
        config.validate()?;
        let config = Arc::new(config);

        let change = {
            let mut data = self.guarded.lock().await;
            if let Participant::Dropped = data.participant {
                return Err(ReplicatedLogError::LogDropped);
            }
            let current_term = data.term_spec.as_ref().map(|s| s.term).unwrap_or(data.persisted_term);
            if term_spec.term < current_term {
                return Err(ReplicatedLogError::StaleTerm {
                    term: term_spec.term,
                    current: current_term,
                });
            }

            let same_term = data.term_spec.as_ref().filter(|current| current.term == term_spec.term).cloned();
            match same_term {
                Some(current) if current.leader == term_spec.leader => {
                    self.update_participants_config(&mut data, config)?;
                    return Ok(());
                }
                Some(current) if current.leader.is_none() && term_spec.leader.as_ref() != Some(&self.id) => {
                    slog::info!(self.logger, "Leader of {:?} is now {:?}", term_spec.term, term_spec.leader);
                    let config = match &data.config {
                        Some(known) if known.generation > config.generation => known.clone(),
                        _ => config,
                    };
                    self.rebuild(&mut data, term_spec, config).await?
                }
                Some(current) => {
                    return Err(ReplicatedLogError::ConflictingLeader {
                        term: term_spec.term,
                        current: current.leader,
                        requested: term_spec.leader,
                    })
                }
                None => {
                    slog::info!(self.logger, "Switching to {:?} led by {:?}", term_spec.term, term_spec.leader);
                    self.rebuild(&mut data, term_spec, config).await?
                }
            }
        };

        change.apply()
    }

    fn update_participants_config(
        &self,
        data: &mut GuardedLogData,
        config: Arc<ParticipantsConfig>,
    ) -> Result<(), ReplicatedLogError> {
        if let Some(current) = &data.config {
            if config.generation <= current.generation {
                slog::debug!(
                    self.logger,
                    "Ignoring config generation {}, have {}",
                    config.generation,
                    current.generation
                );
                return Ok(());
            }
        }
        if let Participant::Leader(leader) = &data.participant {
            let handles = config
                .participants
                .keys()
                .filter(|id| **id != self.id)
                .map(|id| self.factory.follower_handle(id))
                .collect();
            leader.update_participants_config(config.clone(), handles)?;
        }
        data.config = Some(config);
        Ok(())
    }

    /// Resigns the current role and builds the one `term_spec` asks for.
    async fn rebuild(
        &self,
        data: &mut GuardedLogData,
        term_spec: LogTermSpec,
        config: Arc<ParticipantsConfig>,
    ) -> Result<RoleChange, ReplicatedLogError> {
        let (mut core, resigned, resigned_handle) = self.resign_participant(data).await?;
        let mut change = RoleChange {
            resigned,
            resigned_handle,
            new_role: None,
            handle: data.state_handle.clone(),
            error: None,
        };

        if let Err(e) = core.update_metadata(LogMetadata {
            term: term_spec.term,
            leader: term_spec.leader.clone(),
        }) {
            slog::error!(self.logger, "Failed to persist term {:?}: {:?}", term_spec.term, e);
            data.participant = Participant::Unconfigured(core);
            data.term_spec = None;
            change.error = Some(e.into());
            return Ok(change);
        }
        data.persisted_term = term_spec.term;

        let context = ParticipantContext {
            logger: self.logger.clone(),
            state_handle: data.state_handle.clone(),
        };
        let built = if term_spec.leader.as_ref() == Some(&self.id) {
            let info = LeaderTermInfo {
                id: self.id.clone(),
                term: term_spec.term,
                config: config.clone(),
                last_message_id: data.last_message_id,
            };
            self.factory.construct_leader(context, core, info).map(|leader| {
                change.new_role = Some(Role::Leader(leader.clone()));
                Participant::Leader(leader)
            })
        } else {
            let info = FollowerTermInfo {
                id: self.id.clone(),
                term: term_spec.term,
                leader: term_spec.leader.clone(),
            };
            self.factory.construct_follower(context, core, info).map(|follower| {
                change.new_role = Some(Role::Follower(follower.clone()));
                Participant::Follower(follower)
            })
        };

        match built {
            Ok(participant) => {
                data.participant = participant;
                data.term_spec = Some(term_spec);
                data.config = Some(config);
                Ok(change)
            }
            Err(e) => {
                slog::error!(self.logger, "Failed to build participant for {:?}: {}", term_spec, e.error);
                data.participant = Participant::Unconfigured(e.core);
                data.term_spec = None;
                change.error = Some(e.error.into());
                Ok(change)
            }
        }
    }

    /// Takes the core back from the current role. A role that fails to resign stays in place.
    async fn resign_participant(
        &self,
        data: &mut GuardedLogData,
    ) -> Result<(LogCore, DeferredAction, Option<Arc<dyn ReplicatedStateHandle>>), ReplicatedLogError> {
        match std::mem::replace(&mut data.participant, Participant::Dropped) {
            Participant::Unconfigured(core) => Ok((core, DeferredAction::noop(), None)),
            Participant::Leader(leader) => {
                data.last_message_id = data.last_message_id.max(leader.last_message_id());
                match leader.resign().await {
                    Ok((core, action)) => Ok((core, action, data.state_handle.clone())),
                    Err(e) => {
                        slog::error!(self.logger, "Leader lost its log core: {:?}", e);
                        data.participant = Participant::Leader(leader);
                        Err(ReplicatedLogError::LogCoreLost)
                    }
                }
            }
            Participant::Follower(follower) => match follower.resign().await {
                Ok((core, action)) => Ok((core, action, data.state_handle.clone())),
                Err(e) => {
                    slog::error!(self.logger, "Follower lost its log core: {:?}", e);
                    data.participant = Participant::Follower(follower);
                    Err(ReplicatedLogError::LogCoreLost)
                }
            },
            Participant::Dropped => Err(ReplicatedLogError::LogDropped),
        }
    }

    /// Attaches the state handle. The current role is rebuilt so it reports to the handle.
    pub async fn connect(&self, handle: Arc<dyn ReplicatedStateHandle>) -> Result<(), ReplicatedLogError> {
        let change = {
            let mut data = self.guarded.lock().await;
            if data.state_handle.is_some() {
                return Err(ReplicatedLogError::AlreadyConnected);
            }
            data.state_handle = Some(handle);
            self.rebuild_current(&mut data).await?
        };

        match change {
            Some(mut change) => {
                // The resigned role never reported to this handle.
                change.resigned_handle = None;
                change.apply()
            }
            None => Ok(()),
        }
    }

    /// Detaches the state handle and returns it. The current role resigns and is rebuilt
    /// without a handle.
    pub async fn disconnect(&self) -> Result<Option<Arc<dyn ReplicatedStateHandle>>, ReplicatedLogError> {
        let (handle, change) = {
            let mut data = self.guarded.lock().await;
            let handle = match data.state_handle.take() {
                Some(handle) => handle,
                None => return Ok(None),
            };
            let change = self.rebuild_current(&mut data).await?;
            (handle, change)
        };

        if let Some(mut change) = change {
            change.resigned_handle = Some(handle.clone());
            change.apply()?;
        }
        Ok(Some(handle))
    }

    async fn rebuild_current(&self, data: &mut GuardedLogData) -> Result<Option<RoleChange>, ReplicatedLogError> {
        let (term_spec, config) = match (&data.participant, &data.term_spec, &data.config) {
            (Participant::Dropped, _, _) => return Err(ReplicatedLogError::LogDropped),
            (Participant::Unconfigured(_), _, _) => return Ok(None),
            (_, Some(term_spec), Some(config)) => (term_spec.clone(), config.clone()),
            (_, _, _) => return Ok(None),
        };
        self.rebuild(data, term_spec, config).await.map(Some)
    }

    /// Inserts on the leader and starts replicating. Followers redirect to their leader.
    pub async fn insert(&self, payload: LogPayload, wait_for_sync: bool) -> Result<LogIndex, InsertError> {
        let leader = {
            let data = self.guarded.lock().await;
            match &data.participant {
                Participant::Leader(leader) => leader.clone(),
                Participant::Follower(follower) => {
                    return Err(match follower.leader() {
                        Some(leader) => InsertError::LeaderRedirect { leader: leader.clone() },
                        None => InsertError::NoLeader,
                    })
                }
                Participant::Unconfigured(_) => return Err(InsertError::Unconfigured),
                Participant::Dropped => return Err(InsertError::LogDropped),
            }
        };

        let index = leader.insert(payload, wait_for_sync)?;
        leader.trigger_async_replication();
        Ok(index)
    }

    /// Resolves once `index` is committed in the current role.
    pub async fn wait_for(&self, index: LogIndex) -> Result<WaitForResult, ReplicatedLogError> {
        let role = {
            let data = self.guarded.lock().await;
            match &data.participant {
                Participant::Leader(leader) => Role::Leader(leader.clone()),
                Participant::Follower(follower) => Role::Follower(follower.clone()),
                Participant::Unconfigured(_) => return Err(ReplicatedLogError::Unconfigured),
                Participant::Dropped => return Err(ReplicatedLogError::LogDropped),
            }
        };

        let result = match role {
            Role::Leader(leader) => leader.wait_for(index).await,
            Role::Follower(follower) => follower.wait_for(index).await,
        };
        Ok(result?)
    }

    /// Lets the leader compact entries up to `index`. Followers compact when their leader says
    /// so, so this is a no-op there.
    pub async fn release(&self, index: LogIndex) -> Result<(), ReplicatedLogError> {
        let data = self.guarded.lock().await;
        match &data.participant {
            Participant::Leader(leader) => Ok(leader.release(index)?),
            Participant::Follower(_) => Ok(()),
            Participant::Unconfigured(_) => Err(ReplicatedLogError::Unconfigured),
            Participant::Dropped => Err(ReplicatedLogError::LogDropped),
        }
    }

    pub async fn get_status(&self) -> LogStatus {
        let follower = {
            let data = self.guarded.lock().await;
            match &data.participant {
                Participant::Leader(leader) => return LogStatus::Leader(leader.get_status()),
                Participant::Follower(follower) => follower.clone(),
                Participant::Unconfigured(_) => return LogStatus::Unconfigured,
                Participant::Dropped => return LogStatus::Dropped,
            }
        };
        LogStatus::Follower(follower.get_status().await)
    }

    pub async fn get_leader(&self) -> Option<Arc<LogLeader>> {
        match &self.guarded.lock().await.participant {
            Participant::Leader(leader) => Some(leader.clone()),
            _ => None,
        }
    }

    pub async fn get_follower(&self) -> Option<Arc<LogFollower>> {
        match &self.guarded.lock().await.participant {
            Participant::Follower(follower) => Some(follower.clone()),
            _ => None,
        }
    }

    pub async fn term(&self) -> Option<LogTerm> {
        self.guarded.lock().await.term_spec.as_ref().map(|s| s.term)
    }

    /// Resigns the current role and deletes the log. The log accepts nothing afterwards.
    pub async fn drop_log(&self) -> Result<(), ReplicatedLogError> {
        let (resigned, resigned_handle) = {
            let mut data = self.guarded.lock().await;
            let (mut core, resigned, resigned_handle) = self.resign_participant(&mut data).await?;
            data.term_spec = None;
            data.config = None;
            if let Err(e) = core.drop_log().await {
                slog::error!(self.logger, "Failed to drop log: {:?}", e);
                data.participant = Participant::Unconfigured(core);
                return Err(e.into());
            }
            slog::info!(self.logger, "Dropped log");
            (resigned, resigned_handle)
        };

        resigned.fire();
        if let Some(handle) = resigned_handle {
            handle.resign_current_state();
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AbstractFollower for ReplicatedLog {
    fn participant_id(&self) -> &ParticipantId {
        &self.id
    }

    async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, FollowerCallError> {
        let follower = match &self.guarded.lock().await.participant {
            Participant::Follower(follower) => follower.clone(),
            _ => return Err(FollowerCallError::NotAFollower(self.id.clone())),
        };
        Ok(follower.append_entries(request).await)
    }
}
