use crate::api::{ReplicatedLogError, ReplicatedLogOptions, ReplicatedStateHandle, ValidatedLogOptions};
use crate::commitlog::LogCore;
use crate::replica::{
    AbstractFollower, ConstructionError, FollowerTermInfo, LeaderTermInfo, LogFollower, LogLeader,
};
use crate::types::ParticipantId;
use std::convert::TryFrom;
use std::sync::Arc;

/// Hands out the means to talk to another participant.
pub trait FollowerHandleFactory: Send + Sync {
    fn follower_handle(&self, id: &ParticipantId) -> Arc<dyn AbstractFollower>;
}

/// What a participant gets from the log that builds it.
#[derive(Clone)]
pub struct ParticipantContext {
    pub logger: slog::Logger,
    pub state_handle: Option<Arc<dyn ReplicatedStateHandle>>,
}

/// Builds the leader or follower of a term. On failure the log core is handed back.
pub trait ParticipantsFactory: Send + Sync {
    fn construct_follower(
        &self,
        context: ParticipantContext,
        core: LogCore,
        info: FollowerTermInfo,
    ) -> Result<Arc<LogFollower>, ConstructionError>;

    fn construct_leader(
        &self,
        context: ParticipantContext,
        core: LogCore,
        info: LeaderTermInfo,
    ) -> Result<Arc<LogLeader>, ConstructionError>;

    fn follower_handle(&self, id: &ParticipantId) -> Arc<dyn AbstractFollower>;
}

pub struct DefaultParticipantsFactory {
    handles: Arc<dyn FollowerHandleFactory>,
    options: ValidatedLogOptions,
}

impl DefaultParticipantsFactory {
    pub fn new(
        handles: Arc<dyn FollowerHandleFactory>,
        options: ReplicatedLogOptions,
    ) -> Result<Self, ReplicatedLogError> {
        let options = ValidatedLogOptions::try_from(options).map_err(ReplicatedLogError::IllegalOptions)?;
        Ok(DefaultParticipantsFactory { handles, options })
    }
}

impl ParticipantsFactory for DefaultParticipantsFactory {
    fn construct_follower(
        &self,
        context: ParticipantContext,
        core: LogCore,
        info: FollowerTermInfo,
    ) -> Result<Arc<LogFollower>, ConstructionError> {
        LogFollower::construct(context.logger, info, core, context.state_handle)
    }

    fn construct_leader(
        &self,
        context: ParticipantContext,
        core: LogCore,
        info: LeaderTermInfo,
    ) -> Result<Arc<LogLeader>, ConstructionError> {
        let followers = info
            .config
            .participants
            .keys()
            .filter(|id| **id != info.id)
            .map(|id| self.handles.follower_handle(id))
            .collect();

        LogLeader::construct(
            context.logger,
            info,
            core,
            followers,
            self.options.clone(),
            context.state_handle,
        )
    }

    fn follower_handle(&self, id: &ParticipantId) -> Arc<dyn AbstractFollower> {
        self.handles.follower_handle(id)
    }
}
