/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events a replica emits, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are sent by the
//! partner thread over a channel to the [event bus](crate::event_bus), which fires the handlers
//! registered for them in the [`ReplicaSpec`](crate::replica::ReplicaSpec).

use std::sync::mpsc::Sender;
use std::time::{Duration, SystemTime};

use crate::messages::{ProposalContent, TimeoutContent, VoteContent};
use crate::partner::StatusSnapshot;
use crate::types::{
    block::Block,
    certificates::{QuorumCertificate, TimeoutCertificate},
    crypto_primitives::VerifyingKey,
    data_types::{CryptoHash, ExecStateId, Round},
};

pub enum Event {
    // Events that change the pending block tree or the safety state.
    InsertBlock(InsertBlockEvent),
    CommitBlock(CommitBlockEvent),
    PruneBlock(PruneBlockEvent),
    UpdateHighQC(UpdateHighQCEvent),
    UpdatePreferredRound(UpdatePreferredRoundEvent),
    // Events that involve sending a message.
    Propose(ProposeEvent),
    Vote(VoteEvent),
    Timeout(TimeoutEvent),
    // Events that involve receiving a message.
    ReceiveProposal(ReceiveProposalEvent),
    ReceiveVote(ReceiveVoteEvent),
    ReceiveTimeout(ReceiveTimeoutEvent),
    // Round progression events.
    StartRound(StartRoundEvent),
    RoundTimeout(RoundTimeoutEvent),
    CollectQC(CollectQCEvent),
    CollectTC(CollectTCEvent),
    // Periodic observability.
    Status(StatusEvent),
}

impl Event {
    /// Send the event to the event bus, if there is one.
    ///
    /// A replica whose event bus has already shut down keeps running, so a failed send is ignored.
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

pub struct InsertBlockEvent {
    pub timestamp: SystemTime,
    pub block: Block,
    pub exec_state_id: ExecStateId,
}

pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub round: Round,
}

pub struct PruneBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
}

pub struct UpdateHighQCEvent {
    pub timestamp: SystemTime,
    pub high_qc: QuorumCertificate,
}

pub struct UpdatePreferredRoundEvent {
    pub timestamp: SystemTime,
    pub preferred_round: Round,
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub proposal: ProposalContent,
}

pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub next_leader: VerifyingKey,
    pub vote: VoteContent,
}

pub struct TimeoutEvent {
    pub timestamp: SystemTime,
    pub timeout: TimeoutContent,
}

pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub proposal: ProposalContent,
}

pub struct ReceiveVoteEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub vote: VoteContent,
}

pub struct ReceiveTimeoutEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub timeout: TimeoutContent,
}

pub struct StartRoundEvent {
    pub timestamp: SystemTime,
    pub leader: VerifyingKey,
    pub round: Round,
}

pub struct RoundTimeoutEvent {
    pub timestamp: SystemTime,
    pub round: Round,
    pub timeout: Duration,
}

pub struct CollectQCEvent {
    pub timestamp: SystemTime,
    pub quorum_certificate: QuorumCertificate,
}

pub struct CollectTCEvent {
    pub timestamp: SystemTime,
    pub timeout_certificate: TimeoutCertificate,
}

pub struct StatusEvent {
    pub timestamp: SystemTime,
    pub status: StatusSnapshot,
}
