use crate::api::ValidatedLogOptions;
use crate::replica::{
    AbstractFollower, AppendEntriesErrorReason, AppendEntriesRequest, AppendEntriesResult, FollowerStatistics, MessageId,
};
use crate::types::{InMemoryLog, LogIndex, LogTerm, ParticipantId, TermIndexPair};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// Leader-wide values that go into every request of one replication round.
pub(crate) struct ReplicationContext {
    pub leader_id: ParticipantId,
    pub term: LogTerm,
    pub commit_index: LogIndex,
    pub largest_common_index: LogIndex,
    pub lowest_index_to_keep: LogIndex,
    pub wait_for_sync: bool,
    pub max_entries_per_batch: usize,
}

pub(crate) struct PeerState {
    follower: Arc<dyn AbstractFollower>,
    logger: slog::Logger,

    // Entry the next request claims as its previous entry. Moves forward on success and back
    // when the follower reports a conflict.
    next_prev_log_entry: TermIndexPair,
    // > highest log entry known to be replicated on server
    last_acked_entry: TermIndexPair,
    last_acked_commit_index: LogIndex,
    last_acked_largest_common_index: LogIndex,
    last_acked_lowest_index_to_keep: LogIndex,

    // At most one request per follower is outstanding. Responses that don't match it are
    // discarded.
    in_flight: Option<InFlightRequest>,

    last_error_reason: AppendEntriesErrorReason,
    num_errors_in_a_row: u32,
    retry_not_before: Option<Instant>,
    last_request_latency: Option<Duration>,
    last_response_at: Option<DateTime<Utc>>,
}

struct InFlightRequest {
    message_id: MessageId,
    sent_at: Instant,
    prev_log_entry: TermIndexPair,
    last_entry: TermIndexPair,
    leader_commit: LogIndex,
    largest_common_index: LogIndex,
    lowest_index_to_keep: LogIndex,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PeerStateUpdate {
    /// Response to a request we no longer wait for.
    Stale,
    Success,
    /// Cursor moved back; send again right away.
    Rewound,
    Backoff(Duration),
}

impl PeerState {
    pub(crate) fn new(
        follower: Arc<dyn AbstractFollower>,
        logger: slog::Logger,
        next_prev_log_entry: TermIndexPair,
        last_acked_entry: TermIndexPair,
    ) -> Self {
        PeerState {
            follower,
            logger,
            next_prev_log_entry,
            last_acked_entry,
            last_acked_commit_index: LogIndex::zero(),
            last_acked_largest_common_index: LogIndex::zero(),
            last_acked_lowest_index_to_keep: LogIndex::zero(),
            in_flight: None,
            last_error_reason: AppendEntriesErrorReason::None,
            num_errors_in_a_row: 0,
            retry_not_before: None,
            last_request_latency: None,
            last_response_at: None,
        }
    }

    pub(crate) fn follower(&self) -> &Arc<dyn AbstractFollower> {
        &self.follower
    }

    pub(crate) fn last_acked_entry(&self) -> TermIndexPair {
        self.last_acked_entry
    }

    pub(crate) fn has_outstanding_request(&self) -> bool {
        self.in_flight.is_some()
    }

    pub(crate) fn needs_request(&self, spearhead: TermIndexPair, ctx: &ReplicationContext, now: Instant) -> bool {
        if self.has_outstanding_request() {
            return false;
        }
        if let Some(not_before) = self.retry_not_before {
            if now < not_before {
                return false;
            }
        }

        self.next_prev_log_entry != spearhead
            || self.last_acked_commit_index < ctx.commit_index
            || self.last_acked_largest_common_index < ctx.largest_common_index
            || self.last_acked_lowest_index_to_keep < ctx.lowest_index_to_keep
    }

    /// Builds the next request for this follower and marks it in flight.
    pub(crate) fn prepare_request(
        &mut self,
        ctx: &ReplicationContext,
        log: &InMemoryLog,
        message_id: MessageId,
        now: Instant,
    ) -> AppendEntriesRequest {
        let mut prev = self.next_prev_log_entry;
        let mut from = prev.index.plus(1);
        if from < log.first_index() {
            // What the follower needs next was compacted away. Send from the start of our log
            // and let the follower replace its own.
            slog::info!(
                self.logger,
                "Entry {:?} no longer in log, sending from first index {:?}",
                from,
                log.first_index()
            );
            prev = TermIndexPair::zero();
            from = log.first_index();
        }

        let entries = log.slice(from, from.plus(ctx.max_entries_per_batch as u64));
        let request = AppendEntriesRequest {
            leader_id: ctx.leader_id.clone(),
            leader_term: ctx.term,
            prev_log_entry: prev,
            leader_commit: ctx.commit_index,
            largest_common_index: ctx.largest_common_index,
            lowest_index_to_keep: ctx.lowest_index_to_keep,
            message_id,
            entries,
            wait_for_sync: ctx.wait_for_sync,
        };

        self.in_flight = Some(InFlightRequest {
            message_id,
            sent_at: now,
            prev_log_entry: prev,
            last_entry: request.last_entry(),
            leader_commit: ctx.commit_index,
            largest_common_index: ctx.largest_common_index,
            lowest_index_to_keep: ctx.lowest_index_to_keep,
        });

        request
    }

    /// Folds a follower's response into the peer state.
    pub(crate) fn handle_response(
        &mut self,
        message_id: MessageId,
        result: AppendEntriesResult,
        log: &InMemoryLog,
        options: &ValidatedLogOptions,
    ) -> PeerStateUpdate {
        let in_flight = match self.in_flight.take() {
            Some(r) if r.message_id == message_id => r,
            other => {
                slog::warn!(
                    self.logger,
                    "Dropping response to message {:?}, waiting for {:?}",
                    message_id,
                    other.as_ref().map(|r| r.message_id)
                );
                self.in_flight = other;
                return PeerStateUpdate::Stale;
            }
        };

        let now = Instant::now();
        self.last_request_latency = Some(now.duration_since(in_flight.sent_at));
        self.last_response_at = Some(Utc::now());

        match result.reason {
            AppendEntriesErrorReason::None => {
                self.update_log(&in_flight);
                PeerStateUpdate::Success
            }
            AppendEntriesErrorReason::NoPrevLogMatch => {
                let hint = result.conflict.map(|c| c.hint).unwrap_or_else(TermIndexPair::zero);
                let new_prev = log
                    .term_index_pair_at(hint.index.saturating_minus(1))
                    .unwrap_or_else(TermIndexPair::zero);
                slog::info!(
                    self.logger,
                    "Follower has no match for {:?} ({:?}), rewinding to {:?}",
                    in_flight.prev_log_entry,
                    result.conflict,
                    new_prev
                );

                if new_prev == in_flight.prev_log_entry {
                    // Rewinding made no progress; don't hammer the follower.
                    return self.record_error(AppendEntriesErrorReason::NoPrevLogMatch, options, now);
                }

                self.rewind_log(new_prev);
                self.last_error_reason = AppendEntriesErrorReason::NoPrevLogMatch;
                self.num_errors_in_a_row += 1;
                PeerStateUpdate::Rewound
            }
            reason => {
                slog::warn!(
                    self.logger,
                    "AppendEntries {:?} rejected: {:?} {:?}",
                    message_id,
                    reason,
                    result.details
                );
                self.record_error(reason, options, now)
            }
        }
    }

    fn update_log(&mut self, in_flight: &InFlightRequest) {
        self.next_prev_log_entry = in_flight.last_entry;
        self.last_acked_entry = in_flight.last_entry;
        self.last_acked_commit_index = in_flight.leader_commit;
        self.last_acked_largest_common_index = in_flight.largest_common_index;
        self.last_acked_lowest_index_to_keep = in_flight.lowest_index_to_keep;
        self.last_error_reason = AppendEntriesErrorReason::None;
        self.num_errors_in_a_row = 0;
        self.retry_not_before = None;
    }

    fn rewind_log(&mut self, new_prev: TermIndexPair) {
        self.next_prev_log_entry = new_prev;
        // Whatever the follower acked past this point is gone or was never ours.
        if self.last_acked_entry > new_prev {
            self.last_acked_entry = new_prev;
        }
    }

    fn record_error(
        &mut self,
        reason: AppendEntriesErrorReason,
        options: &ValidatedLogOptions,
        now: Instant,
    ) -> PeerStateUpdate {
        self.last_error_reason = reason;
        self.num_errors_in_a_row += 1;
        let delay = retry_backoff(self.num_errors_in_a_row, options);
        self.retry_not_before = Some(now + delay);
        PeerStateUpdate::Backoff(delay)
    }

    pub(crate) fn statistics(&self) -> FollowerStatistics {
        FollowerStatistics {
            spear_head: self.last_acked_entry,
            commit_index: self.last_acked_commit_index,
            last_error_reason: self.last_error_reason,
            num_errors_in_a_row: self.num_errors_in_a_row,
            request_in_flight: self.has_outstanding_request(),
            last_request_latency: self.last_request_latency,
            last_response_at: self.last_response_at,
        }
    }
}

/// Exponential backoff between the configured bounds, with jitter so followers that failed
/// together don't get retried together.
fn retry_backoff(num_errors_in_a_row: u32, options: &ValidatedLogOptions) -> Duration {
    let exponent = num_errors_in_a_row.saturating_sub(1).min(16);
    let min_ms = options.min_retry_backoff.as_millis() as u64;
    let max_ms = options.max_retry_backoff.as_millis() as u64;
    let ceiling = min_ms.saturating_mul(1 << exponent).min(max_ms);
    let floor = (ceiling / 2).max(min_ms.min(ceiling));

    Duration::from_millis(rand::thread_rng().gen_range(floor..=ceiling))
}
