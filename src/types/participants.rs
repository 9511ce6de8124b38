use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// ParticipantId is the unique, cluster-wide name of a log participant (leader or follower).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        ParticipantId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ParticipantId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        ParticipantId::new(id)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ParticipantFlags {
    /// Whether acks from this participant count toward the write concern.
    pub allowed_in_quorum: bool,
    /// A forced participant must have acked an index before it can commit.
    pub forced: bool,
}

impl Default for ParticipantFlags {
    fn default() -> Self {
        ParticipantFlags {
            allowed_in_quorum: true,
            forced: false,
        }
    }
}

impl ParticipantFlags {
    pub fn forced() -> Self {
        ParticipantFlags {
            allowed_in_quorum: true,
            forced: true,
        }
    }

    pub fn excluded() -> Self {
        ParticipantFlags {
            allowed_in_quorum: false,
            forced: false,
        }
    }
}

/// ParticipantsConfig is the set of participants of a log and the rules for forming a quorum
/// among them. A config with a higher generation supersedes any config with a lower one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantsConfig {
    pub generation: u64,
    pub participants: BTreeMap<ParticipantId, ParticipantFlags>,
    pub effective_write_concern: usize,
    pub wait_for_sync: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidParticipantsConfig {
    #[error("config has no participants")]
    NoParticipants,
    #[error("effective write concern must be at least 1")]
    WriteConcernZero,
    #[error("participant {0} is forced but not allowed in quorum")]
    ForcedNotAllowedInQuorum(ParticipantId),
}

impl ParticipantsConfig {
    /// Config with default flags for every participant.
    pub fn new<I>(generation: u64, participants: I, effective_write_concern: usize) -> Self
    where
        I: IntoIterator<Item = ParticipantId>,
    {
        ParticipantsConfig {
            generation,
            participants: participants
                .into_iter()
                .map(|p| (p, ParticipantFlags::default()))
                .collect(),
            effective_write_concern,
            wait_for_sync: false,
        }
    }

    pub fn validate(&self) -> Result<(), InvalidParticipantsConfig> {
        if self.participants.is_empty() {
            return Err(InvalidParticipantsConfig::NoParticipants);
        }
        if self.effective_write_concern == 0 {
            return Err(InvalidParticipantsConfig::WriteConcernZero);
        }
        for (id, flags) in self.participants.iter() {
            if flags.forced && !flags.allowed_in_quorum {
                return Err(InvalidParticipantsConfig::ForcedNotAllowedInQuorum(id.clone()));
            }
        }

        Ok(())
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    pub fn flags(&self, id: &ParticipantId) -> Option<ParticipantFlags> {
        self.participants.get(id).copied()
    }

    pub fn with_flags(mut self, id: &ParticipantId, flags: ParticipantFlags) -> Self {
        self.participants.insert(id.clone(), flags);
        self
    }
}
