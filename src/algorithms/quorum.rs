use crate::types::{LogIndex, ParticipantFlags, ParticipantId};

/// What the leader knows about one participant when computing the commit index. The leader
/// itself is included.
#[derive(Clone, Debug)]
pub struct ParticipantQuorumState {
    pub id: ParticipantId,
    pub last_acked_index: LogIndex,
    pub flags: ParticipantFlags,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitFailReason {
    NothingToCommit,
    QuorumSizeNotReached { who: Vec<ParticipantId> },
    ForcedParticipantNotInQuorum { who: Vec<ParticipantId> },
    NotEnoughEligibleParticipants { eligible: usize, required: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitComputation {
    pub commit_index: LogIndex,
    /// Participants that have acked at least `commit_index`.
    pub quorum: Vec<ParticipantId>,
    /// Set when the commit index could not be moved forward.
    pub fail_reason: Option<CommitFailReason>,
}

/// Computes the commit index from participant acks.
///
/// An index `i` can commit if at least `write_concern` participants that are allowed in quorum
/// acked `i`, every forced participant acked `i`, and `i` is not before the first entry of the
/// leader's term. Entries from older terms commit only implicitly, once an entry of the current
/// term commits. The result never goes below `current_commit_index`.
pub fn calculate_commit_index(
    participants: &[ParticipantQuorumState],
    write_concern: usize,
    current_commit_index: LogIndex,
    first_index_of_term: LogIndex,
    spearhead: LogIndex,
) -> CommitComputation {
    let mut eligible: Vec<LogIndex> = participants
        .iter()
        .filter(|p| p.flags.allowed_in_quorum)
        .map(|p| p.last_acked_index)
        .collect();

    if eligible.len() < write_concern || write_concern == 0 {
        return CommitComputation {
            commit_index: current_commit_index,
            quorum: quorum_at(participants, current_commit_index),
            fail_reason: Some(CommitFailReason::NotEnoughEligibleParticipants {
                eligible: eligible.len(),
                required: write_concern,
            }),
        };
    }

    // The write_concern-th largest ack is the highest index that enough participants have.
    eligible.sort_unstable_by(|a, b| b.cmp(a));
    let mut candidate = eligible[write_concern - 1];

    let forced_min = participants
        .iter()
        .filter(|p| p.flags.forced)
        .map(|p| p.last_acked_index)
        .min();
    if let Some(forced_min) = forced_min {
        candidate = candidate.min(forced_min);
    }
    candidate = candidate.min(spearhead);

    if candidate > current_commit_index && candidate >= first_index_of_term {
        return CommitComputation {
            commit_index: candidate,
            quorum: quorum_at(participants, candidate),
            fail_reason: None,
        };
    }

    CommitComputation {
        commit_index: current_commit_index,
        quorum: quorum_at(participants, current_commit_index),
        fail_reason: Some(fail_reason(
            participants,
            current_commit_index,
            first_index_of_term,
            spearhead,
        )),
    }
}

fn fail_reason(
    participants: &[ParticipantQuorumState],
    current_commit_index: LogIndex,
    first_index_of_term: LogIndex,
    spearhead: LogIndex,
) -> CommitFailReason {
    if spearhead <= current_commit_index {
        return CommitFailReason::NothingToCommit;
    }

    let wanted = current_commit_index.plus(1).max(first_index_of_term);
    let lagging = |p: &&ParticipantQuorumState| p.last_acked_index < wanted;

    let forced: Vec<ParticipantId> = participants
        .iter()
        .filter(|p| p.flags.forced)
        .filter(lagging)
        .map(|p| p.id.clone())
        .collect();
    if !forced.is_empty() {
        return CommitFailReason::ForcedParticipantNotInQuorum { who: forced };
    }

    CommitFailReason::QuorumSizeNotReached {
        who: participants
            .iter()
            .filter(|p| p.flags.allowed_in_quorum)
            .filter(lagging)
            .map(|p| p.id.clone())
            .collect(),
    }
}

fn quorum_at(participants: &[ParticipantQuorumState], index: LogIndex) -> Vec<ParticipantId> {
    participants
        .iter()
        .filter(|p| p.flags.allowed_in_quorum && p.last_acked_index >= index)
        .map(|p| p.id.clone())
        .collect()
}

/// The highest index every participant allowed in quorum has acked, capped at the commit index.
/// Never goes below `current`.
pub fn calculate_largest_common_index(
    participants: &[ParticipantQuorumState],
    current: LogIndex,
    commit_index: LogIndex,
) -> LogIndex {
    let min_acked = participants
        .iter()
        .filter(|p| p.flags.allowed_in_quorum)
        .map(|p| p.last_acked_index)
        .min();

    match min_acked {
        Some(min_acked) => current.max(min_acked.min(commit_index)),
        None => current,
    }
}
