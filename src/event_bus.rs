/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that receives [events](crate::events) from the partner thread and fires the handlers
//! registered for them.
//!
//! Handlers run on the event bus thread, never on the partner thread, so a slow handler delays other
//! handlers but never consensus itself.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Registered handlers, one list per event type. The default logging handler, if enabled, comes first
/// in each list.
#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) insert_block_handlers: Vec<HandlerPtr<InsertBlockEvent>>,
    pub(crate) commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
    pub(crate) prune_block_handlers: Vec<HandlerPtr<PruneBlockEvent>>,
    pub(crate) update_high_qc_handlers: Vec<HandlerPtr<UpdateHighQCEvent>>,
    pub(crate) update_preferred_round_handlers: Vec<HandlerPtr<UpdatePreferredRoundEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) vote_handlers: Vec<HandlerPtr<VoteEvent>>,
    pub(crate) timeout_handlers: Vec<HandlerPtr<TimeoutEvent>>,
    pub(crate) receive_proposal_handlers: Vec<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) receive_vote_handlers: Vec<HandlerPtr<ReceiveVoteEvent>>,
    pub(crate) receive_timeout_handlers: Vec<HandlerPtr<ReceiveTimeoutEvent>>,
    pub(crate) start_round_handlers: Vec<HandlerPtr<StartRoundEvent>>,
    pub(crate) round_timeout_handlers: Vec<HandlerPtr<RoundTimeoutEvent>>,
    pub(crate) collect_qc_handlers: Vec<HandlerPtr<CollectQCEvent>>,
    pub(crate) collect_tc_handlers: Vec<HandlerPtr<CollectTCEvent>>,
    pub(crate) status_handlers: Vec<HandlerPtr<StatusEvent>>,
}

fn with_logger<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    handlers.extend(user_handler);
    handlers
}

/// User-provided handlers, at most one per event type.
#[derive(Default)]
pub(crate) struct UserHandlers {
    pub(crate) on_insert_block: Option<HandlerPtr<InsertBlockEvent>>,
    pub(crate) on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    pub(crate) on_prune_block: Option<HandlerPtr<PruneBlockEvent>>,
    pub(crate) on_update_high_qc: Option<HandlerPtr<UpdateHighQCEvent>>,
    pub(crate) on_update_preferred_round: Option<HandlerPtr<UpdatePreferredRoundEvent>>,
    pub(crate) on_propose: Option<HandlerPtr<ProposeEvent>>,
    pub(crate) on_vote: Option<HandlerPtr<VoteEvent>>,
    pub(crate) on_timeout: Option<HandlerPtr<TimeoutEvent>>,
    pub(crate) on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) on_receive_vote: Option<HandlerPtr<ReceiveVoteEvent>>,
    pub(crate) on_receive_timeout: Option<HandlerPtr<ReceiveTimeoutEvent>>,
    pub(crate) on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    pub(crate) on_round_timeout: Option<HandlerPtr<RoundTimeoutEvent>>,
    pub(crate) on_collect_qc: Option<HandlerPtr<CollectQCEvent>>,
    pub(crate) on_collect_tc: Option<HandlerPtr<CollectTCEvent>>,
    pub(crate) on_status: Option<HandlerPtr<StatusEvent>>,
}

impl EventHandlers {
    pub(crate) fn new(log_events: bool, user: UserHandlers) -> EventHandlers {
        EventHandlers {
            insert_block_handlers: with_logger(log_events, user.on_insert_block),
            commit_block_handlers: with_logger(log_events, user.on_commit_block),
            prune_block_handlers: with_logger(log_events, user.on_prune_block),
            update_high_qc_handlers: with_logger(log_events, user.on_update_high_qc),
            update_preferred_round_handlers: with_logger(log_events, user.on_update_preferred_round),
            propose_handlers: with_logger(log_events, user.on_propose),
            vote_handlers: with_logger(log_events, user.on_vote),
            timeout_handlers: with_logger(log_events, user.on_timeout),
            receive_proposal_handlers: with_logger(log_events, user.on_receive_proposal),
            receive_vote_handlers: with_logger(log_events, user.on_receive_vote),
            receive_timeout_handlers: with_logger(log_events, user.on_receive_timeout),
            start_round_handlers: with_logger(log_events, user.on_start_round),
            round_timeout_handlers: with_logger(log_events, user.on_round_timeout),
            collect_qc_handlers: with_logger(log_events, user.on_collect_qc),
            collect_tc_handlers: with_logger(log_events, user.on_collect_tc),
            status_handlers: with_logger(log_events, user.on_status),
        }
    }

    /// Whether no handler at all is registered, in which case no event bus thread is needed.
    pub(crate) fn is_empty(&self) -> bool {
        self.insert_block_handlers.is_empty()
            && self.commit_block_handlers.is_empty()
            && self.prune_block_handlers.is_empty()
            && self.update_high_qc_handlers.is_empty()
            && self.update_preferred_round_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.vote_handlers.is_empty()
            && self.timeout_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.receive_vote_handlers.is_empty()
            && self.receive_timeout_handlers.is_empty()
            && self.start_round_handlers.is_empty()
            && self.round_timeout_handlers.is_empty()
            && self.collect_qc_handlers.is_empty()
            && self.collect_tc_handlers.is_empty()
            && self.status_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::InsertBlock(insert_block_event) => self
                .insert_block_handlers
                .iter()
                .for_each(|handler| handler(&insert_block_event)),

            Event::CommitBlock(commit_block_event) => self
                .commit_block_handlers
                .iter()
                .for_each(|handler| handler(&commit_block_event)),

            Event::PruneBlock(prune_block_event) => self
                .prune_block_handlers
                .iter()
                .for_each(|handler| handler(&prune_block_event)),

            Event::UpdateHighQC(update_high_qc_event) => self
                .update_high_qc_handlers
                .iter()
                .for_each(|handler| handler(&update_high_qc_event)),

            Event::UpdatePreferredRound(update_preferred_round_event) => self
                .update_preferred_round_handlers
                .iter()
                .for_each(|handler| handler(&update_preferred_round_event)),

            Event::Propose(propose_event) => self
                .propose_handlers
                .iter()
                .for_each(|handler| handler(&propose_event)),

            Event::Vote(vote_event) => self
                .vote_handlers
                .iter()
                .for_each(|handler| handler(&vote_event)),

            Event::Timeout(timeout_event) => self
                .timeout_handlers
                .iter()
                .for_each(|handler| handler(&timeout_event)),

            Event::ReceiveProposal(receive_proposal_event) => self
                .receive_proposal_handlers
                .iter()
                .for_each(|handler| handler(&receive_proposal_event)),

            Event::ReceiveVote(receive_vote_event) => self
                .receive_vote_handlers
                .iter()
                .for_each(|handler| handler(&receive_vote_event)),

            Event::ReceiveTimeout(receive_timeout_event) => self
                .receive_timeout_handlers
                .iter()
                .for_each(|handler| handler(&receive_timeout_event)),

            Event::StartRound(start_round_event) => self
                .start_round_handlers
                .iter()
                .for_each(|handler| handler(&start_round_event)),

            Event::RoundTimeout(round_timeout_event) => self
                .round_timeout_handlers
                .iter()
                .for_each(|handler| handler(&round_timeout_event)),

            Event::CollectQC(collect_qc_event) => self
                .collect_qc_handlers
                .iter()
                .for_each(|handler| handler(&collect_qc_event)),

            Event::CollectTC(collect_tc_event) => self
                .collect_tc_handlers
                .iter()
                .for_each(|handler| handler(&collect_tc_event)),

            Event::Status(status_event) => self
                .status_handlers
                .iter()
                .for_each(|handler| handler(&status_event)),
        }
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Start the event bus thread. It runs until it receives a shutdown signal, or until the partner
/// thread hangs up its end of the event channel.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                // Drain what the partner already published before it stopped.
                while let Ok(event) = event_subscriber.try_recv() {
                    event_handlers.fire_handlers(event)
                }
                return;
            }
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
